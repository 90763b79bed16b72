use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::{LedgerError, Result};

pub const ID_PREFIX: &str = "DEC-";
const SUFFIX_LEN: usize = 4;

static GENERATE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Allocates identifiers for new decisions.
///
/// Implementations must return canonical ids (`DEC-` + 4 lowercase hex chars)
/// that are near-certainly unique across the life of a log.
pub trait IdGenerator {
    fn generate(&self, problem: &str, choice: &str) -> String;
}

/// Hashes the decision text together with a per-call nonce, so two agents
/// recording the same problem/choice still get different ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashIdGenerator;

impl IdGenerator for HashIdGenerator {
    fn generate(&self, problem: &str, choice: &str) -> String {
        let now = Utc::now();
        let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros());
        let counter = GENERATE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(problem.as_bytes());
        hasher.update(b":");
        hasher.update(choice.as_bytes());
        hasher.update(format!(":{nanos}:{}:{counter}", process::id()).as_bytes());
        let digest = hasher.finalize();
        format!("{ID_PREFIX}{:02x}{:02x}", digest[0], digest[1])
    }
}

/// Canonicalizes user-typed ids. Accepts `DEC-a1b2`, `dec-A1B2` and the bare
/// suffix `a1b2`.
pub fn normalize_id(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let suffix = match trimmed.get(..ID_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(ID_PREFIX) => &trimmed[ID_PREFIX.len()..],
        _ => trimmed,
    };
    if !is_hex_suffix(suffix) {
        return Err(LedgerError::InvalidId(input.to_string()));
    }
    Ok(format!("{ID_PREFIX}{}", suffix.to_ascii_lowercase()))
}

pub fn is_valid_id(id: &str) -> bool {
    id.strip_prefix(ID_PREFIX)
        .is_some_and(|suffix| is_hex_suffix(suffix) && suffix == suffix.to_ascii_lowercase())
}

fn is_hex_suffix(raw: &str) -> bool {
    raw.len() == SUFFIX_LEN && raw.bytes().all(|byte| byte.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_canonical() {
        let generator = HashIdGenerator;
        for _ in 0..32 {
            let id = generator.generate("rate limits", "100 req/min");
            assert!(is_valid_id(&id), "non-canonical id {id}");
        }
    }

    #[test]
    fn normalizes_accepted_spellings() {
        assert_eq!(normalize_id("DEC-a1b2").expect("prefixed"), "DEC-a1b2");
        assert_eq!(normalize_id("dec-A1B2").expect("lower prefix"), "DEC-a1b2");
        assert_eq!(normalize_id("  a1b2 ").expect("bare suffix"), "DEC-a1b2");
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "DEC-", "DEC-a1b", "DEC-a1b2c", "DEC-zzzz", "X-a1b2", "a1b2c"] {
            assert!(
                matches!(normalize_id(bad), Err(LedgerError::InvalidId(_))),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn valid_id_requires_canonical_case() {
        assert!(is_valid_id("DEC-00ff"));
        assert!(!is_valid_id("DEC-00FF"));
        assert!(!is_valid_id("dec-00ff"));
    }
}
