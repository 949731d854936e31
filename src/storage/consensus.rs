//! Consensus rule runner.
//!
//! Applies a per-operation [`ConsensusRule`] across a set of backend nodes.
//! Only [`ConsensusRule::FirstSuccess`] is implemented: nodes are attempted in
//! configured order and the first non-error response wins; transport failures
//! fall through to the next node and are never retried against the same one.
//! The remaining rules are deliberate API surface and fail deterministically
//! rather than silently degrading to first-success.

use crate::error::{DeaddropError, Result};
use crate::storage::{ConsensusRule, Node};
use std::future::Future;
use tracing::warn;

/// Runs `op` against `nodes` under `rule` and aggregates the outcome.
pub async fn run<T, F, Fut>(rule: ConsensusRule, nodes: &[Node], op: F) -> Result<T>
where
    F: FnMut(Node) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match rule {
        ConsensusRule::FirstSuccess => first_success(nodes, op).await,
        other => Err(DeaddropError::NotImplemented(other.name())),
    }
}

/// Attempts `op` against each node in order, returning the first success.
pub async fn first_success<T, F, Fut>(nodes: &[Node], mut op: F) -> Result<T>
where
    F: FnMut(Node) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for node in nodes {
        match op(node.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(url = %node.url, error = %err, "node failed, falling through");
            }
        }
    }
    Err(DeaddropError::NoNodesAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(urls: &[&str]) -> Vec<Node> {
        urls.iter().map(|url| Node::with_url(*url)).collect()
    }

    #[tokio::test]
    async fn test_first_success_returns_first_ok() {
        let nodes = nodes(&["a", "b", "c"]);
        let result = run(ConsensusRule::FirstSuccess, &nodes, |node| async move {
            Ok::<_, DeaddropError>(node.url)
        })
        .await
        .unwrap();
        assert_eq!(result, "a");
    }

    #[tokio::test]
    async fn test_first_success_falls_through_failures() {
        let nodes = nodes(&["a", "b", "c"]);
        let result = run(ConsensusRule::FirstSuccess, &nodes, |node| async move {
            if node.url == "c" {
                Ok(node.url)
            } else {
                Err(DeaddropError::storage("unreachable"))
            }
        })
        .await
        .unwrap();
        assert_eq!(result, "c");
    }

    #[tokio::test]
    async fn test_all_nodes_failing_is_no_nodes_available() {
        let nodes = nodes(&["a", "b"]);
        let result = run(ConsensusRule::FirstSuccess, &nodes, |_| async {
            Err::<(), _>(DeaddropError::storage("down"))
        })
        .await;
        assert!(matches!(result, Err(DeaddropError::NoNodesAvailable)));
    }

    #[tokio::test]
    async fn test_empty_node_list_is_no_nodes_available() {
        let result = run(ConsensusRule::FirstSuccess, &[], |_| async {
            Ok::<(), DeaddropError>(())
        })
        .await;
        assert!(matches!(result, Err(DeaddropError::NoNodesAvailable)));
    }

    #[tokio::test]
    async fn test_unimplemented_rules_are_deterministic() {
        let nodes = nodes(&["a"]);
        for rule in [
            ConsensusRule::RedundantPair,
            ConsensusRule::Majority,
            ConsensusRule::Unanimous,
        ] {
            let result = run(rule, &nodes, |_| async { Ok::<(), DeaddropError>(()) }).await;
            assert!(
                matches!(result, Err(DeaddropError::NotImplemented(name)) if name == rule.name())
            );
        }
    }
}
