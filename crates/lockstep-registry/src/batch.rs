//! Whole-array batch operations
//!
//! A batch issues one call per node concurrently and joins on all of them.
//! Wall-clock cost is bounded by the slowest node or the global timeout;
//! one node failing never aborts the others.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use lockstep_channel::{ChannelError, ChannelResult};
use lockstep_core::{LockstepError, LockstepResult, NodeId};

/// One node's failure within a batch.
#[derive(Clone, Debug)]
pub struct NodeFailure {
    pub node: NodeId,
    pub error: ChannelError,
}

/// Per-node outcomes of one batch operation, in node order.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    ok: Vec<(NodeId, T)>,
    failures: Vec<NodeFailure>,
}

impl<T> BatchOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[NodeFailure] {
        &self.failures
    }

    pub fn successes(&self) -> &[(NodeId, T)] {
        &self.ok
    }

    /// Collapse into a result, surfacing the first per-node failure by
    /// identity.
    pub fn into_result(self) -> LockstepResult<Vec<(NodeId, T)>> {
        match self.failures.into_iter().next() {
            Some(failure) => Err(LockstepError::Channel {
                node: failure.node,
                reason: failure.error.to_string(),
            }),
            None => Ok(self.ok),
        }
    }
}

/// Run `f` against every node concurrently on blocking tasks.
///
/// `nodes` are cheap clones (id + channel handle). Results come back in
/// node order; nodes still outstanding when the timeout fires are marked
/// failed with [`ChannelError::Timeout`] and their tasks aborted.
pub(crate) async fn run_batch<N, T, F>(
    nodes: &[N],
    ids: Vec<NodeId>,
    timeout: Duration,
    f: F,
) -> BatchOutcome<T>
where
    N: Clone + Send + 'static,
    T: Send + 'static,
    F: Fn(&N) -> ChannelResult<T> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let mut set = JoinSet::new();
    for (index, node) in nodes.iter().cloned().enumerate() {
        let f = Arc::clone(&f);
        set.spawn_blocking(move || (index, f(&node)));
    }

    let mut slots: Vec<Option<ChannelResult<T>>> = Vec::new();
    slots.resize_with(nodes.len(), || None);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut timed_out = false;
    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((index, result)))) => slots[index] = Some(result),
            Ok(Some(Err(join_err))) => {
                tracing::error!("batch task failed: {join_err}");
            }
            Ok(None) => break,
            Err(_) => {
                timed_out = true;
                set.abort_all();
                break;
            }
        }
    }

    let mut ok = Vec::new();
    let mut failures = Vec::new();
    for (id, slot) in ids.into_iter().zip(slots) {
        match slot {
            Some(Ok(value)) => ok.push((id, value)),
            Some(Err(error)) => failures.push(NodeFailure { node: id, error }),
            None => {
                let error = if timed_out {
                    ChannelError::Timeout(timeout)
                } else {
                    ChannelError::Io("batch task aborted".into())
                };
                failures.push(NodeFailure { node: id, error });
            }
        }
    }

    BatchOutcome { ok, failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct FakeNode {
        value: u32,
        fail: bool,
    }

    fn ids(n: usize) -> Vec<NodeId> {
        (0..n).map(|i| NodeId::new(format!("node-{i}"))).collect()
    }

    #[tokio::test]
    async fn test_batch_preserves_node_order() {
        let nodes = vec![
            FakeNode { value: 10, fail: false },
            FakeNode { value: 20, fail: false },
        ];
        let outcome = run_batch(&nodes, ids(2), Duration::from_secs(1), |n: &FakeNode| {
            Ok(n.value)
        })
        .await;

        let values = outcome.into_result().unwrap();
        assert_eq!(values[0], (NodeId::new("node-0"), 10));
        assert_eq!(values[1], (NodeId::new("node-1"), 20));
    }

    #[tokio::test]
    async fn test_first_failure_is_named_without_aborting_others() {
        let nodes = vec![
            FakeNode { value: 1, fail: false },
            FakeNode { value: 2, fail: true },
            FakeNode { value: 3, fail: false },
        ];
        let outcome = run_batch(&nodes, ids(3), Duration::from_secs(1), |n: &FakeNode| {
            if n.fail {
                Err(ChannelError::Io("boom".into()))
            } else {
                Ok(n.value)
            }
        })
        .await;

        assert_eq!(outcome.successes().len(), 2);
        assert_eq!(outcome.failures().len(), 1);
        let err = outcome.into_result().unwrap_err();
        assert!(err.to_string().contains("node-1"), "{err}");
    }

    #[tokio::test]
    async fn test_batch_timeout_marks_stragglers() {
        let nodes = vec![FakeNode { value: 1, fail: false }];
        let outcome = run_batch(&nodes, ids(1), Duration::from_millis(20), |_: &FakeNode| {
            std::thread::sleep(Duration::from_secs(5));
            Ok(0u32)
        })
        .await;

        assert!(!outcome.is_ok());
        assert!(matches!(
            outcome.failures()[0].error,
            ChannelError::Timeout(_)
        ));
    }
}
