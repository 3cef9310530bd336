//! Node identity and role types

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of one controlled device.
///
/// Nodes are addressed by hostname, so this is a cheap-to-clone string
/// wrapper rather than a numeric id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Arc<str>);

impl NodeId {
    pub fn new(host: impl Into<String>) -> Self {
        NodeId(host.into().into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(host: &str) -> Self {
        NodeId::new(host)
    }
}

/// Role of a node in the pipeline. Fixed at construction, never changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRole {
    /// Generates the channelized spectrum stream.
    Producer,
    /// Integrates the producer stream over time.
    Accumulator,
}

impl NodeRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeRole::Producer => "producer",
            NodeRole::Accumulator => "accumulator",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
