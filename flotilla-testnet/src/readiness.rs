use flotilla_core::{FlotillaError, NodeClient, Result};
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::config::ReadinessPolicy;

/// Polls `client` until it reports a block height above zero.
///
/// Each status call is bounded by the policy's status timeout; a call that
/// runs over counts as a failed call. A status error on a non-final attempt
/// is retried. On the final attempt it is returned as a readiness error. Running out of attempts without
/// seeing progress is a convergence error naming `node`. Returns the first
/// height observed above zero.
pub async fn wait_for_progress(
    node: &str,
    client: &dyn NodeClient,
    policy: &ReadinessPolicy,
) -> Result<u64> {
    for attempt in 1..=policy.attempts {
        let last = attempt == policy.attempts;
        let status = match timeout(policy.status_timeout, client.status()).await {
            Ok(result) => result,
            Err(_) => Err(FlotillaError::timeout(format!(
                "status call after {:?}",
                policy.status_timeout
            ))),
        };
        match status {
            Ok(status) if status.latest_block_height > 0 => {
                debug!(node, attempt, height = status.latest_block_height, "Node is producing blocks");
                return Ok(status.latest_block_height);
            }
            Ok(_) => {
                if last {
                    return Err(FlotillaError::convergence(node));
                }
                debug!(node, attempt, "Node is not synced yet, waiting");
            }
            Err(e) => {
                if last {
                    return Err(FlotillaError::readiness(node, e.to_string()));
                }
                debug!(node, attempt, error = %e, "Status call failed, retrying");
            }
        }
        sleep(policy.interval).await;
    }
    Err(FlotillaError::convergence(node))
}
