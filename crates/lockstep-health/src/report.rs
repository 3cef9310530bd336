//! Check results

use lockstep_core::NodeId;

/// One per-node finding from a failed check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDiagnostic {
    pub node: NodeId,
    pub detail: String,
}

/// Outcome of one health check.
#[derive(Clone, Debug)]
pub struct HealthCheck {
    pub name: &'static str,
    pub passed: bool,
    /// Per-node findings; empty when the check passed.
    pub details: Vec<NodeDiagnostic>,
    /// Array-wide findings not attributable to one node.
    pub notes: Vec<String>,
}

impl HealthCheck {
    pub fn pass(name: &'static str) -> Self {
        HealthCheck {
            name,
            passed: true,
            details: Vec::new(),
            notes: Vec::new(),
        }
    }

    /// Record a per-node finding and mark the check failed.
    pub fn flag(&mut self, node: &NodeId, detail: impl Into<String>) {
        self.passed = false;
        self.details.push(NodeDiagnostic {
            node: node.clone(),
            detail: detail.into(),
        });
    }

    /// Record an array-wide finding and mark the check failed.
    pub fn note(&mut self, note: impl Into<String>) {
        self.passed = false;
        self.notes.push(note.into());
    }
}

/// A group of check outcomes, healthy only if all passed.
#[derive(Clone, Debug, Default)]
pub struct HealthReport {
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn push(&mut self, check: HealthCheck) {
        self.checks.push(check);
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failing(&self) -> impl Iterator<Item = &HealthCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}
