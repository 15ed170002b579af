//! Policy configuration and enforcement.

use crate::{Error, Operation, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Query policy loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPolicy {
    /// Keywords that reject a query when found anywhere in its text.
    #[serde(default = "default_forbidden_keywords")]
    pub forbidden_keywords: Vec<String>,

    /// Reject `delete` operations that have no `where` clause.
    #[serde(default = "default_true")]
    pub require_where_on_delete: bool,
}

fn default_forbidden_keywords() -> Vec<String> {
    vec!["drop".to_string(), "truncate".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            forbidden_keywords: default_forbidden_keywords(),
            require_where_on_delete: true,
        }
    }
}

/// Result of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl QueryPolicy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let policy: Self = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    fn validate(&self) -> Result<()> {
        if self.forbidden_keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(Error::Invalid(
                "forbidden_keywords must not contain empty entries".to_string(),
            ));
        }
        Ok(())
    }

    /// Check a query before execution.
    pub fn check(&self, query: &str, operation: Operation) -> Decision {
        if query.trim().is_empty() {
            return Decision::Deny {
                reason: "query must not be empty".to_string(),
            };
        }

        let lowered = query.to_lowercase();

        for keyword in &self.forbidden_keywords {
            if lowered.contains(&keyword.to_lowercase()) {
                return Decision::Deny {
                    reason: format!(
                        "unsafe query: contains forbidden keyword '{}'",
                        keyword.to_uppercase()
                    ),
                };
            }
        }

        if self.require_where_on_delete
            && operation == Operation::Delete
            && !lowered.contains("where")
        {
            return Decision::Deny {
                reason: "unsafe query: DELETE without WHERE clause".to_string(),
            };
        }

        Decision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_plain_select() {
        let policy = QueryPolicy::default();
        assert!(policy.check("SELECT 1", Operation::Select).is_allowed());
    }

    #[test]
    fn rejects_empty_query() {
        let policy = QueryPolicy::default();
        assert!(!policy.check("   \n\t", Operation::Select).is_allowed());
    }

    #[test]
    fn rejects_forbidden_keywords_in_any_case() {
        let policy = QueryPolicy::default();
        assert!(!policy.check("DROP TABLE x", Operation::Select).is_allowed());
        assert!(!policy.check("drop table x", Operation::Delete).is_allowed());
        assert!(!policy.check("TrUnCaTe users", Operation::Update).is_allowed());
    }

    #[test]
    fn keyword_match_is_substring() {
        let policy = QueryPolicy::default();
        let decision = policy.check("SELECT dropout FROM runs", Operation::Select);
        assert!(!decision.is_allowed());
    }

    #[test]
    fn delete_requires_where() {
        let policy = QueryPolicy::default();
        assert_eq!(
            policy.check("DELETE FROM users", Operation::Delete),
            Decision::Deny {
                reason: "unsafe query: DELETE without WHERE clause".to_string()
            }
        );
        assert!(
            policy
                .check("DELETE FROM users WHERE id = $1", Operation::Delete)
                .is_allowed()
        );
    }

    #[test]
    fn where_rule_only_applies_to_delete() {
        let policy = QueryPolicy::default();
        assert!(policy.check("UPDATE users SET a = 1", Operation::Update).is_allowed());
    }

    #[test]
    fn denial_reason_names_the_keyword() {
        let policy = QueryPolicy::default();
        let Decision::Deny { reason } = policy.check("drop table x", Operation::Select) else {
            panic!("drop was allowed");
        };
        assert!(reason.contains("DROP"));
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
forbidden_keywords = ["drop", "truncate", "alter"]
require_where_on_delete = false
"#;
        let policy = QueryPolicy::parse(toml).unwrap();

        assert!(!policy.check("ALTER TABLE x ADD y int", Operation::Update).is_allowed());
        assert!(policy.check("DELETE FROM x", Operation::Delete).is_allowed());
    }

    #[test]
    fn parse_empty_uses_defaults() {
        let policy = QueryPolicy::parse("").unwrap();
        assert_eq!(policy, QueryPolicy::default());
    }

    #[test]
    fn parse_rejects_blank_keyword() {
        let err = QueryPolicy::parse(r#"forbidden_keywords = [" "]"#).unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[test]
    fn operation_serde_is_lowercase() {
        let op: Operation = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(op, Operation::Delete);
        assert_eq!(serde_json::to_string(&Operation::Select).unwrap(), "\"select\"");
    }
}
