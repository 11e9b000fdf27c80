//! Core identifier types for the workflow graph.
//!
//! These are the fundamental domain concepts that define what a workflow
//! *is*: nodes are identified by a stable [`NodeId`]; everything else
//! (state, edges, work items) refers back to one of these.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a workflow graph.
///
/// `Start` and `End` are virtual: they are never registered with
/// [`crate::graph::GraphBuilder::add`] and carry no node implementation.
/// They exist purely as topology anchors — every graph's initial frontier
/// is seeded from `Start`'s outgoing edges, and a route to `End` means
/// "this branch is finished".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// Virtual entry point. Has no incoming edges.
    Start,
    /// Virtual terminal point. Has no outgoing edges.
    End,
    /// A user-registered node, identified by a unique name.
    Custom(String),
}

impl NodeId {
    /// Encode into the persisted string form used by checkpoints.
    ///
    /// `Start` → `"Start"`, `End` → `"End"`, `Custom("x")` → `"Custom:x"`.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeId::Start => "Start".to_string(),
            NodeId::End => "End".to_string(),
            NodeId::Custom(s) => format!("Custom:{s}"),
        }
    }

    /// Decode a persisted string back into a `NodeId`.
    ///
    /// Unrecognized strings are treated as `Custom` for forward compatibility.
    #[must_use]
    pub fn decode(s: &str) -> Self {
        match s {
            "Start" => NodeId::Start,
            "End" => NodeId::End,
            other => match other.strip_prefix("Custom:") {
                Some(rest) => NodeId::Custom(rest.to_string()),
                None => NodeId::Custom(other.to_string()),
            },
        }
    }

    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    #[must_use]
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// The raw name, for hashing/order-key derivation. Virtual nodes use
    /// their encoded form so `Start`/`End` participate in order-key
    /// derivation deterministically alongside custom nodes.
    #[must_use]
    pub fn as_key_bytes(&self) -> Vec<u8> {
        self.encode().into_bytes()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::decode(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId::decode(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for id in [
            NodeId::Start,
            NodeId::End,
            NodeId::Custom("process".to_string()),
        ] {
            assert_eq!(NodeId::decode(&id.encode()), id);
        }
    }

    #[test]
    fn decode_unknown_format_falls_back_to_custom() {
        assert_eq!(NodeId::decode("whatever"), NodeId::Custom("whatever".into()));
    }

    #[test]
    fn display_matches_encode_for_custom() {
        let id = NodeId::Custom("fetch".to_string());
        assert_eq!(id.to_string(), "fetch");
        assert_eq!(id.encode(), "Custom:fetch");
    }
}
