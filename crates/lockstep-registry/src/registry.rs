//! The node registry

use std::time::Duration;

use lockstep_channel::{capture, ChannelResult, SnapCapture, SnapRequest};
use lockstep_core::{LockstepError, LockstepResult, NodeId};

use crate::batch::{run_batch, BatchOutcome};
use crate::{AccumulatorNode, Node, ProducerNode};

/// The fixed set of controlled devices, partitioned by role.
///
/// Both sets are disjoint and never change for the registry's lifetime.
pub struct NodeRegistry {
    producers: Vec<ProducerNode>,
    accumulators: Vec<AccumulatorNode>,
    batch_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(
        producers: Vec<ProducerNode>,
        accumulators: Vec<AccumulatorNode>,
        batch_timeout: Duration,
    ) -> Self {
        NodeRegistry {
            producers,
            accumulators,
            batch_timeout,
        }
    }

    pub fn producers(&self) -> &[ProducerNode] {
        &self.producers
    }

    pub fn accumulators(&self) -> &[AccumulatorNode] {
        &self.accumulators
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = Node> + '_ {
        self.producers
            .iter()
            .cloned()
            .map(Node::Producer)
            .chain(self.accumulators.iter().cloned().map(Node::Accumulator))
    }

    /// The producer whose counters stand in for the whole array's.
    pub fn reference_producer(&self) -> LockstepResult<&ProducerNode> {
        self.producers.first().ok_or(LockstepError::NoProducers)
    }

    fn producer_ids(&self) -> Vec<NodeId> {
        self.producers.iter().map(|n| n.id().clone()).collect()
    }

    fn accumulator_ids(&self) -> Vec<NodeId> {
        self.accumulators.iter().map(|n| n.id().clone()).collect()
    }

    /// Run `f` once per producer, concurrently.
    pub async fn map_producers<T, F>(&self, f: F) -> BatchOutcome<T>
    where
        T: Send + 'static,
        F: Fn(&ProducerNode) -> ChannelResult<T> + Send + Sync + 'static,
    {
        run_batch(&self.producers, self.producer_ids(), self.batch_timeout, f).await
    }

    /// Run `f` once per accumulator, concurrently.
    pub async fn map_accumulators<T, F>(&self, f: F) -> BatchOutcome<T>
    where
        T: Send + 'static,
        F: Fn(&AccumulatorNode) -> ChannelResult<T> + Send + Sync + 'static,
    {
        run_batch(
            &self.accumulators,
            self.accumulator_ids(),
            self.batch_timeout,
            f,
        )
        .await
    }

    pub async fn read_producers(&self, register: &str) -> BatchOutcome<u32> {
        let register = register.to_string();
        self.map_producers(move |node| node.channel().read_word(&register))
            .await
    }

    pub async fn write_producers(&self, register: &str, value: u32) -> BatchOutcome<()> {
        let register = register.to_string();
        self.map_producers(move |node| node.channel().write_word(&register, value))
            .await
    }

    pub async fn read_accumulators(&self, register: &str) -> BatchOutcome<u32> {
        let register = register.to_string();
        self.map_accumulators(move |node| node.channel().read_word(&register))
            .await
    }

    pub async fn write_accumulators(&self, register: &str, value: u32) -> BatchOutcome<()> {
        let register = register.to_string();
        self.map_accumulators(move |node| node.channel().write_word(&register, value))
            .await
    }

    /// Trigger the same snap device on every producer and collect what
    /// each captured.
    pub async fn snap_producers(&self, request: SnapRequest) -> BatchOutcome<SnapCapture> {
        self.map_producers(move |node| capture(&**node.channel(), &request))
            .await
    }

    /// Trigger the same snap device on every accumulator and collect what
    /// each captured.
    pub async fn snap_accumulators(&self, request: SnapRequest) -> BatchOutcome<SnapCapture> {
        self.map_accumulators(move |node| capture(&**node.channel(), &request))
            .await
    }

    /// Run `f` against one producer on a blocking task.
    pub async fn with_producer<T, F>(&self, index: usize, f: F) -> LockstepResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&ProducerNode) -> ChannelResult<T> + Send + 'static,
    {
        let node = self.producers.get(index).ok_or_else(|| LockstepError::Channel {
            node: NodeId::new(format!("producer[{index}]")),
            reason: "no such producer".into(),
        })?;
        call_single(node.clone(), node.id().clone(), self.batch_timeout, f).await
    }

    /// Run `f` against one accumulator on a blocking task.
    pub async fn with_accumulator<T, F>(&self, index: usize, f: F) -> LockstepResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&AccumulatorNode) -> ChannelResult<T> + Send + 'static,
    {
        let node = self.accumulators.get(index).ok_or_else(|| LockstepError::Channel {
            node: NodeId::new(format!("accumulator[{index}]")),
            reason: "no such accumulator".into(),
        })?;
        call_single(node.clone(), node.id().clone(), self.batch_timeout, f).await
    }

    /// Validate reachability of every configured node. One failed ping is
    /// retried once; a second failure aborts with [`LockstepError::Connectivity`].
    pub async fn ping_all(&self) -> LockstepResult<()> {
        let producer_pings = self.map_producers(|node| node.channel().ping()).await;
        let accumulator_pings = self.map_accumulators(|node| node.channel().ping()).await;

        let mut retry: Vec<Node> = Vec::new();
        for failure in producer_pings.failures().iter().chain(accumulator_pings.failures()) {
            tracing::warn!(node = %failure.node, "ping failed, retrying: {}", failure.error);
            retry.extend(self.all_nodes().filter(|n| n.id() == &failure.node));
        }

        for node in retry {
            let id = node.id().clone();
            let channel = node.channel().clone();
            let retried = tokio::task::spawn_blocking(move || channel.ping()).await;
            match retried {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    return Err(LockstepError::Connectivity {
                        node: id,
                        reason: error.to_string(),
                    });
                }
                Err(join_err) => {
                    return Err(LockstepError::Connectivity {
                        node: id,
                        reason: format!("task failed: {join_err}"),
                    });
                }
            }
        }
        Ok(())
    }
}

/// One node call on a blocking task, bounded by the batch timeout.
async fn call_single<N, T, F>(
    node: N,
    id: NodeId,
    timeout: Duration,
    f: F,
) -> LockstepResult<T>
where
    N: Send + 'static,
    T: Send + 'static,
    F: FnOnce(&N) -> ChannelResult<T> + Send + 'static,
{
    let joined = tokio::time::timeout(timeout, tokio::task::spawn_blocking(move || f(&node))).await;
    match joined {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(error))) => Err(LockstepError::Channel {
            node: id,
            reason: error.to_string(),
        }),
        Ok(Err(join_err)) => Err(LockstepError::Channel {
            node: id,
            reason: format!("task failed: {join_err}"),
        }),
        Err(_) => Err(LockstepError::Channel {
            node: id,
            reason: format!("timed out after {timeout:?}"),
        }),
    }
}
