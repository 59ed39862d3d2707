//! Canonical deployment stages and the substring-based derivation rule
//! (spec §3 invariants, §8 boundary behaviors).

use serde::{Deserialize, Serialize};
use std::fmt;

/// The four canonical deployment stages. Order here is also precedence
/// order for [`derive_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Dev,
    Qa,
    Uat,
    Prod,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Dev, Stage::Qa, Stage::Uat, Stage::Prod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "DEV",
            Stage::Qa => "QA",
            Stage::Uat => "UAT",
            Stage::Prod => "PROD",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Derive a canonical stage from an arbitrary environment key by
/// case-insensitive substring match, in order `prod -> PROD`, `uat -> UAT`,
/// `qa|green -> QA`, else `DEV`.
///
/// This opinionated substring mapping is named explicitly in spec §9 as a
/// known limitation (e.g. `"green"` colliding with unrelated uses of the
/// word) with no per-project override mechanism specified. Do not invent one.
pub fn derive_stage(env_key: &str) -> Stage {
    let lower = env_key.to_lowercase();
    if lower.contains("prod") {
        Stage::Prod
    } else if lower.contains("uat") {
        Stage::Uat
    } else if lower.contains("qa") || lower.contains("green") {
        Stage::Qa
    } else {
        Stage::Dev
    }
}

/// Normalize an environment key: trim, lowercase, empty becomes `None`.
/// Spec §3: "Normalized env key is never the empty string; absent means
/// absent."
pub fn normalize_env_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim().to_lowercase();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_derivation_boundary_cases() {
        assert_eq!(derive_stage("PRODUCTION").as_str(), "PROD");
        assert_eq!(derive_stage("green").as_str(), "QA");
        assert_eq!(derive_stage("integration-uat").as_str(), "UAT");
        assert_eq!(derive_stage("").as_str(), "DEV");
    }

    #[test]
    fn prod_takes_precedence_over_other_substrings() {
        // "produat" contains both prod and uat; prod wins by precedence order.
        assert_eq!(derive_stage("produat").as_str(), "PROD");
    }

    #[test]
    fn normalize_env_key_trims_and_lowercases() {
        assert_eq!(normalize_env_key("  QA  "), Some("qa".to_string()));
        assert_eq!(normalize_env_key(""), None);
        assert_eq!(normalize_env_key("   "), None);
    }
}
