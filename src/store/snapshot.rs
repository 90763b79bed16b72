use std::collections::HashMap;

use serde::{Deserialize, Deserializer};

use crate::decision::{DecidedBy, Decision, DecisionStatus, DecisionType};

/// One line of the log as read back.
///
/// Only `id` is required. The first line for an id carries the full record;
/// later lines for the same id may carry just the lifecycle fields they change.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(rename = "type", default)]
    pub decision_type: Option<DecisionType>,
    #[serde(default)]
    pub problem: Option<String>,
    #[serde(default)]
    pub choice: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub tradeoffs: Option<Vec<String>>,
    #[serde(default)]
    pub decided_by: Option<DecidedBy>,
    #[serde(default)]
    pub files: Option<Vec<String>>,
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default)]
    pub refs: Option<Vec<String>>,
    #[serde(default, deserialize_with = "blank_status_as_none")]
    pub status: Option<DecisionStatus>,
    #[serde(default)]
    pub superseded_by: Option<String>,
    #[serde(default)]
    pub supersedes: Option<String>,
    #[serde(default)]
    pub hypothesis: Option<String>,
    #[serde(default)]
    pub success_criteria: Option<String>,
}

impl Snapshot {
    /// Builds the seed record for an id. Without a `type` there is nothing to
    /// index, so such a line cannot seed.
    pub fn into_decision(self) -> Option<Decision> {
        let decision_type = self.decision_type?;
        Some(Decision {
            id: self.id,
            created_at: self.created_at.unwrap_or_default(),
            decision_type,
            problem: self.problem.unwrap_or_default(),
            choice: self.choice.unwrap_or_default(),
            rationale: self.rationale,
            tradeoffs: self.tradeoffs.unwrap_or_default(),
            decided_by: self.decided_by.unwrap_or_default(),
            files: self.files.unwrap_or_default(),
            symbols: self.symbols.unwrap_or_default(),
            refs: self.refs.unwrap_or_default(),
            status: self.status.unwrap_or(DecisionStatus::Active),
            superseded_by: self.superseded_by,
            supersedes: self.supersedes,
            hypothesis: self.hypothesis,
            success_criteria: self.success_criteria,
        })
    }

    /// Applies a later line for the same id. Only the lifecycle fields move;
    /// everything else keeps its first-seen value.
    pub fn overlay_onto(&self, decision: &mut Decision) {
        if let Some(status) = self.status {
            decision.status = status;
        }
        if let Some(successor) = &self.superseded_by {
            decision.superseded_by = Some(successor.clone());
        }
        if let Some(predecessor) = &self.supersedes {
            decision.supersedes = Some(predecessor.clone());
        }
    }
}

fn blank_status_as_none<'de, D>(deserializer: D) -> Result<Option<DecisionStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Current state per id after folding every log line in file order.
///
/// Iteration follows first appearance in the log, so anything built from a
/// `LatestState` is deterministic for a given log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestState {
    decisions: Vec<Decision>,
    positions: HashMap<String, usize>,
}

impl LatestState {
    pub fn from_snapshots(snapshots: impl IntoIterator<Item = Snapshot>) -> Self {
        let mut state = Self::default();
        for snapshot in snapshots {
            state.apply(snapshot);
        }
        state
    }

    fn apply(&mut self, snapshot: Snapshot) {
        if let Some(&pos) = self.positions.get(&snapshot.id) {
            snapshot.overlay_onto(&mut self.decisions[pos]);
            return;
        }

        let id = snapshot.id.clone();
        match snapshot.into_decision() {
            Some(decision) => {
                self.positions.insert(id, self.decisions.len());
                self.decisions.push(decision);
            }
            None => {
                tracing::warn!(id = %id, "skipping log line without a type; it cannot seed a decision");
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Decision> {
        self.positions.get(id).map(|&pos| &self.decisions[pos])
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Decision> {
        self.decisions.iter()
    }

    pub fn into_decisions(self) -> Vec<Decision> {
        self.decisions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(raw: &str) -> Snapshot {
        serde_json::from_str(raw).expect("snapshot parses")
    }

    const FULL_X: &str = concat!(
        r#"{"id":"DEC-000a","created_at":"2026-02-22T00:00:00.000000000Z","type":"product","#,
        r#""problem":"pricing","choice":"free tier","rationale":"growth","decided_by":{"role":"human"},"#,
        r#""files":["src/billing.rs"],"status":"active"}"#
    );

    #[test]
    fn later_lines_overlay_only_lifecycle_fields() {
        let state = LatestState::from_snapshots([
            snapshot(FULL_X),
            snapshot(r#"{"id":"DEC-000a","status":"superseded","superseded_by":"DEC-000b"}"#),
        ]);

        let merged = state.get("DEC-000a").expect("merged decision");
        assert_eq!(merged.status, DecisionStatus::Superseded);
        assert_eq!(merged.superseded_by.as_deref(), Some("DEC-000b"));
        assert_eq!(merged.problem, "pricing");
        assert_eq!(merged.choice, "free tier");
        assert_eq!(merged.rationale.as_deref(), Some("growth"));
        assert_eq!(merged.files, vec!["src/billing.rs".to_string()]);
        assert_eq!(merged.created_at, "2026-02-22T00:00:00.000000000Z");
    }

    #[test]
    fn first_seen_wins_for_content_fields() {
        let state = LatestState::from_snapshots([
            snapshot(FULL_X),
            snapshot(
                r#"{"id":"DEC-000a","type":"learning","problem":"rewritten","choice":"other","files":["x.rs"],"status":"active"}"#,
            ),
        ]);
        let merged = state.get("DEC-000a").expect("merged decision");
        assert_eq!(merged.decision_type, DecisionType::Product);
        assert_eq!(merged.problem, "pricing");
        assert_eq!(merged.files, vec!["src/billing.rs".to_string()]);
    }

    #[test]
    fn blank_or_missing_status_does_not_overlay() {
        let state = LatestState::from_snapshots([
            snapshot(FULL_X),
            snapshot(r#"{"id":"DEC-000a","status":"","supersedes":"DEC-0009"}"#),
        ]);
        let merged = state.get("DEC-000a").expect("merged decision");
        assert_eq!(merged.status, DecisionStatus::Active);
        assert_eq!(merged.supersedes.as_deref(), Some("DEC-0009"));
    }

    #[test]
    fn null_links_are_treated_as_absent() {
        let state = LatestState::from_snapshots([
            snapshot(FULL_X),
            snapshot(r#"{"id":"DEC-000a","status":"superseded","superseded_by":"DEC-000b"}"#),
            snapshot(r#"{"id":"DEC-000a","superseded_by":null}"#),
        ]);
        let merged = state.get("DEC-000a").expect("merged decision");
        assert_eq!(merged.superseded_by.as_deref(), Some("DEC-000b"));
    }

    #[test]
    fn untyped_seed_is_skipped_and_next_line_seeds() {
        let state = LatestState::from_snapshots([
            snapshot(r#"{"id":"DEC-000c","status":"superseded"}"#),
            snapshot(
                r#"{"id":"DEC-000c","created_at":"t","type":"process","problem":"p","choice":"c","decided_by":{"role":"agent"},"status":"active"}"#,
            ),
        ]);
        let seeded = state.get("DEC-000c").expect("seeded from second line");
        assert_eq!(seeded.decision_type, DecisionType::Process);
        assert_eq!(seeded.status, DecisionStatus::Active);
    }

    #[test]
    fn iteration_follows_first_appearance() {
        let second = FULL_X.replace("DEC-000a", "DEC-000d");
        let state = LatestState::from_snapshots([
            snapshot(&second),
            snapshot(FULL_X),
            snapshot(r#"{"id":"DEC-000d","status":"superseded","superseded_by":"DEC-000a"}"#),
        ]);
        let ids = state.iter().map(|d| d.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["DEC-000d", "DEC-000a"]);
        assert_eq!(state.len(), 2);
    }
}
