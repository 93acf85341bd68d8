//! Helper functions shared by the node and pod reconcilers.

use crate::error::ControllerError;
use std::future::Future;
use tracing::debug;

/// Effect applied to architecture taints and tolerations.
pub const NO_SCHEDULE: &str = "NoSchedule";

/// Elements of the first sequence that also occur in every later sequence.
///
/// - No sequences: empty result
/// - One sequence: that sequence unchanged
/// - Otherwise: the second sequence is scanned in order and each element
///   present in all other sequences is emitted. Output order follows the
///   second sequence, and duplicates in it are kept.
///
/// Callers that need set semantics deduplicate the result themselves.
pub fn intersection<T: PartialEq + Clone>(sequences: &[Vec<T>]) -> Vec<T> {
    match sequences {
        [] => Vec::new(),
        [only] => only.clone(),
        [first, second, rest @ ..] => second
            .iter()
            .filter(|item| first.contains(*item) && rest.iter().all(|seq| seq.contains(*item)))
            .cloned()
            .collect(),
    }
}

/// Run a read-modify-write `operation` and re-run it immediately, up to
/// `max_attempts` times in total, while it fails with a write conflict.
///
/// The closure receives the 1-indexed attempt number and must re-read the
/// object on every call. Any other error is returned at once.
pub async fn retry_on_conflict<T, F, Fut>(
    max_attempts: u32,
    mut operation: F,
) -> Result<T, ControllerError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                debug!(attempt, error = %e, "Write conflict, re-reading object");
                attempt += 1;
            }
            result => return result,
        }
    }
}
