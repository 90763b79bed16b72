use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Product,
    Process,
    Constraint,
    Learning,
}

impl DecisionType {
    pub const ALL: [Self; 4] = [
        Self::Product,
        Self::Process,
        Self::Constraint,
        Self::Learning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Process => "process",
            Self::Constraint => "constraint",
            Self::Learning => "learning",
        }
    }
}

impl FromStr for DecisionType {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == raw.trim())
            .ok_or_else(|| LedgerError::InvalidType(raw.to_string()))
    }
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionStatus {
    Active,
    Superseded,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Superseded => "superseded",
        }
    }
}

impl FromStr for DecisionStatus {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim() {
            "active" => Ok(Self::Active),
            "superseded" => Ok(Self::Superseded),
            _ => Err(LedgerError::InvalidStatus(raw.to_string())),
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Human,
    Agent,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
        }
    }
}

impl FromStr for Role {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            _ => Err(LedgerError::InvalidRole(raw.to_string())),
        }
    }
}

/// Who made a decision. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecidedBy {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
}

/// A recorded decision, as written to the log and stored in the index's
/// `raw_json` column.
///
/// Field order is the on-disk order. Absent optionals and empty lists are
/// omitted so log lines stay compact and diffable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub created_at: String,
    #[serde(rename = "type")]
    pub decision_type: DecisionType,
    pub problem: String,
    pub choice: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tradeoffs: Vec<String>,
    pub decided_by: DecidedBy,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub refs: Vec<String>,
    pub status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_criteria: Option<String>,
}

impl Decision {
    pub fn new(id: impl Into<String>, input: DecisionInput, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at: format_timestamp(now),
            decision_type: input.decision_type,
            problem: input.problem,
            choice: input.choice,
            rationale: input.rationale,
            tradeoffs: input.tradeoffs,
            decided_by: input.decided_by.unwrap_or_default(),
            files: input.files,
            symbols: input.symbols,
            refs: input.refs,
            status: DecisionStatus::Active,
            superseded_by: None,
            supersedes: input.supersedes,
            hypothesis: input.hypothesis,
            success_criteria: input.success_criteria,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == DecisionStatus::Active
    }

    /// Retires this decision in favour of `successor`. `superseded_by` is set
    /// exactly when the status is `superseded`.
    pub fn mark_superseded(&mut self, successor: &str) {
        self.status = DecisionStatus::Superseded;
        self.superseded_by = Some(successor.to_string());
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Caller-supplied fields for a new decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionInput {
    pub decision_type: DecisionType,
    pub problem: String,
    pub choice: String,
    pub rationale: Option<String>,
    pub tradeoffs: Vec<String>,
    pub decided_by: Option<DecidedBy>,
    pub files: Vec<String>,
    pub symbols: Vec<String>,
    pub refs: Vec<String>,
    pub hypothesis: Option<String>,
    pub success_criteria: Option<String>,
    pub supersedes: Option<String>,
}

impl DecisionInput {
    pub fn new(
        decision_type: DecisionType,
        problem: impl Into<String>,
        choice: impl Into<String>,
    ) -> Self {
        Self {
            decision_type,
            problem: problem.into(),
            choice: choice.into(),
            rationale: None,
            tradeoffs: Vec::new(),
            decided_by: None,
            files: Vec::new(),
            symbols: Vec::new(),
            refs: Vec::new(),
            hypothesis: None,
            success_criteria: None,
            supersedes: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.problem.trim().is_empty() {
            return Err(LedgerError::MissingField("problem"));
        }
        if self.choice.trim().is_empty() {
            return Err(LedgerError::MissingField("choice"));
        }
        Ok(())
    }
}

/// Fixed-width UTC timestamp, so lexical order of `created_at` is time order.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 22, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn minimal_decision_omits_absent_fields() {
        let input = DecisionInput::new(DecisionType::Constraint, "rate limits", "100 req/min");
        let decision = Decision::new("DEC-a1b2", input, fixed_now());

        assert_eq!(
            decision.to_json().expect("serialize"),
            concat!(
                r#"{"id":"DEC-a1b2","created_at":"2026-02-22T12:00:00.000000000Z","#,
                r#""type":"constraint","problem":"rate limits","choice":"100 req/min","#,
                r#""decided_by":{"role":"human"},"status":"active"}"#
            )
        );
    }

    #[test]
    fn parses_full_record_written_by_other_tools() {
        let raw = concat!(
            r#"{"id":"DEC-00ff","created_at":"2026-01-05T09:30:00.5Z","type":"learning","#,
            r#""problem":"flaky tests","choice":"pin the clock","rationale":"time drift","#,
            r#""tradeoffs":["less realism"],"decided_by":{"role":"agent","identifier":"ci-bot"},"#,
            r#""files":["src/clock.rs"],"symbols":["Clock::now"],"refs":["JIRA-12"],"#,
            r#""status":"superseded","superseded_by":"DEC-0100","hypothesis":"fewer flakes","#,
            r#""success_criteria":"green for a week"}"#
        );
        let decision = Decision::from_json(raw).expect("parse");
        assert_eq!(decision.decision_type, DecisionType::Learning);
        assert_eq!(decision.decided_by.role, Role::Agent);
        assert_eq!(decision.decided_by.identifier.as_deref(), Some("ci-bot"));
        assert_eq!(decision.superseded_by.as_deref(), Some("DEC-0100"));
        assert_eq!(decision.to_json().expect("serialize"), raw);
    }

    #[test]
    fn rejects_unknown_type_and_blank_required_fields() {
        assert!(matches!(
            "decision".parse::<DecisionType>(),
            Err(LedgerError::InvalidType(_))
        ));
        assert_eq!(
            "constraint".parse::<DecisionType>().expect("valid"),
            DecisionType::Constraint
        );

        let blank_problem = DecisionInput::new(DecisionType::Product, "  ", "x");
        assert!(matches!(
            blank_problem.validate(),
            Err(LedgerError::MissingField("problem"))
        ));
        let blank_choice = DecisionInput::new(DecisionType::Product, "x", "");
        assert!(matches!(
            blank_choice.validate(),
            Err(LedgerError::MissingField("choice"))
        ));
    }

    #[test]
    fn mark_superseded_sets_status_and_forward_link_together() {
        let mut decision = Decision::new(
            "DEC-0001",
            DecisionInput::new(DecisionType::Process, "p", "c"),
            fixed_now(),
        );
        assert!(decision.is_active());
        decision.mark_superseded("DEC-0002");
        assert_eq!(decision.status, DecisionStatus::Superseded);
        assert_eq!(decision.superseded_by.as_deref(), Some("DEC-0002"));
    }

    #[test]
    fn timestamps_are_fixed_width() {
        let whole = format_timestamp(fixed_now());
        let fractional = format_timestamp(fixed_now() + chrono::Duration::milliseconds(100));
        assert_eq!(whole.len(), fractional.len());
        assert!(whole < fractional);
    }
}
