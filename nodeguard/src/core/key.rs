//! Deadline pool member keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::NodeGuardError;

/// Identifies one execution attempt of a node: `"{node_id}_{version}"`.
///
/// The version changes every time the engine re-enters a node, so a key
/// popped from the pool can be checked against the live state row to tell
/// whether the attempt it describes is still running.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeKey {
    node_id: String,
    version: String,
}

impl NodeKey {
    /// Creates a key from its parts.
    #[must_use]
    pub fn new(node_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            version: version.into(),
        }
    }

    /// The node identifier.
    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The state version of the attempt.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.node_id, self.version)
    }
}

impl FromStr for NodeKey {
    type Err = NodeGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((node_id, version)) if !node_id.is_empty() && !version.is_empty() => {
                Ok(Self::new(node_id, version))
            }
            _ => Err(NodeGuardError::InvalidNodeKey(s.to_string())),
        }
    }
}

impl TryFrom<String> for NodeKey {
    type Error = NodeGuardError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeKey> for String {
    fn from(key: NodeKey) -> Self {
        key.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let key = NodeKey::new("n3f2a", "v91cc");
        assert_eq!(key.to_string(), "n3f2a_v91cc");
    }

    #[test]
    fn test_key_parse() {
        let key: NodeKey = "n3f2a_v91cc".parse().unwrap();
        assert_eq!(key.node_id(), "n3f2a");
        assert_eq!(key.version(), "v91cc");
    }

    #[test]
    fn test_key_parse_rejects_malformed() {
        assert!("no-separator".parse::<NodeKey>().is_err());
        assert!("_v1".parse::<NodeKey>().is_err());
        assert!("n1_".parse::<NodeKey>().is_err());
    }

    #[test]
    fn test_key_serializes_as_string() {
        let keys = vec![NodeKey::new("n1", "v1"), NodeKey::new("n2", "v7")];
        let json = serde_json::to_string(&keys).unwrap();
        assert_eq!(json, r#"["n1_v1","n2_v7"]"#);

        let back: Vec<NodeKey> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, keys);
    }
}
