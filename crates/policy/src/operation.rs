use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of statement a query is declared as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Select => "select",
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Whether the statement only reads.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Operation::Select)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_lowercase_names_only() {
        let op: Operation = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(op, Operation::Delete);
        assert_eq!(op.to_string(), "delete");
        assert!(serde_json::from_str::<Operation>("\"DROP\"").is_err());
    }
}
