use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::Error;

// =============================================================================
// Operation Tags
// =============================================================================

/// An operation an agent instance may invoke.
///
/// The vocabulary is closed: configuration that names anything else fails to
/// load. Declaration order is the display order of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    ReadNetwork,
    ReadFile,
    SearchFile,
    EnumerateFile,
    Delegate,
    WriteFile,
    ModifyFile,
    ExecuteShell,
}

impl Operation {
    /// Every operation in the vocabulary.
    pub const ALL: [Operation; 8] = [
        Operation::ReadNetwork,
        Operation::ReadFile,
        Operation::SearchFile,
        Operation::EnumerateFile,
        Operation::Delegate,
        Operation::WriteFile,
        Operation::ModifyFile,
        Operation::ExecuteShell,
    ];

    /// Privileged operations are never granted to chat-triggered agents.
    pub fn is_privileged(self) -> bool {
        match self {
            Operation::WriteFile | Operation::ModifyFile | Operation::ExecuteShell => true,
            Operation::ReadNetwork
            | Operation::ReadFile
            | Operation::SearchFile
            | Operation::EnumerateFile
            | Operation::Delegate => false,
        }
    }

    /// Wire name of the tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::ReadNetwork => "read-network",
            Operation::ReadFile => "read-file",
            Operation::SearchFile => "search-file",
            Operation::EnumerateFile => "enumerate-file",
            Operation::Delegate => "delegate",
            Operation::WriteFile => "write-file",
            Operation::ModifyFile => "modify-file",
            Operation::ExecuteShell => "execute-shell",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::config(format!("unknown operation tag '{}'", s)))
    }
}

// =============================================================================
// Capability Profile
// =============================================================================

/// The closed, ordered set of operations an agent instance may invoke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityProfile {
    operations: BTreeSet<Operation>,
}

impl CapabilityProfile {
    /// An empty profile.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the profile grants `op`.
    pub fn contains(&self, op: Operation) -> bool {
        self.operations.contains(&op)
    }

    /// Iterate granted operations in tag order.
    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.operations.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Whether every operation of `self` is also in `other`.
    pub fn is_subset(&self, other: &CapabilityProfile) -> bool {
        self.operations.is_subset(&other.operations)
    }

    /// Operations present in both profiles.
    pub fn intersection(&self, other: &CapabilityProfile) -> CapabilityProfile {
        self.operations
            .intersection(&other.operations)
            .copied()
            .collect()
    }

    /// A copy of the profile with `op` removed.
    pub fn without(&self, op: Operation) -> CapabilityProfile {
        self.iter().filter(|o| *o != op).collect()
    }

    /// Whether any privileged operation is present.
    pub fn has_privileged(&self) -> bool {
        self.iter().any(Operation::is_privileged)
    }

    /// Tag names in order, e.g. for worker processes and audit records.
    pub fn tags(&self) -> Vec<&'static str> {
        self.iter().map(Operation::as_str).collect()
    }
}

impl FromIterator<Operation> for CapabilityProfile {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        Self {
            operations: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CapabilityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tags().join(", "))
    }
}
