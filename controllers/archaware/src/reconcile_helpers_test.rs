//! Unit tests for reconcile_helpers module

#[cfg(test)]
mod tests {
    use crate::error::ControllerError;
    use crate::reconcile_helpers::*;
    use crate::store::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_intersection_of_nothing_is_empty() {
        let result: Vec<String> = intersection(&[]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_intersection_of_one_sequence_is_identity() {
        let result = intersection(&[strings(&["arm64", "amd64", "arm64"])]);
        assert_eq!(result, strings(&["arm64", "amd64", "arm64"]));
    }

    #[test]
    fn test_intersection_of_two() {
        let result = intersection(&[strings(&["amd64", "arm64"]), strings(&["arm64"])]);
        assert_eq!(result, strings(&["arm64"]));
    }

    #[test]
    fn test_intersection_of_three() {
        let result = intersection(&[
            strings(&["amd64", "arm64"]),
            strings(&["arm64", "arm"]),
            strings(&["arm64"]),
        ]);
        assert_eq!(result, strings(&["arm64"]));
    }

    #[test]
    fn test_intersection_requires_membership_in_every_sequence() {
        let result = intersection(&[
            strings(&["amd64", "arm64"]),
            strings(&["amd64", "arm64"]),
            strings(&["amd64"]),
        ]);
        assert_eq!(result, strings(&["amd64"]));
    }

    #[test]
    fn test_intersection_order_follows_later_sequence() {
        let result = intersection(&[strings(&["amd64", "arm64"]), strings(&["arm64", "amd64"])]);
        assert_eq!(result, strings(&["arm64", "amd64"]));
    }

    #[test]
    fn test_intersection_keeps_duplicates_from_later_sequence() {
        let result = intersection(&[strings(&["amd64"]), strings(&["amd64", "amd64"])]);
        assert_eq!(result, strings(&["amd64", "amd64"]));
    }

    #[test]
    fn test_intersection_disjoint() {
        let result = intersection(&[strings(&["s390x"]), strings(&["arm64", "amd64"])]);
        assert!(result.is_empty());
    }

    #[test]
    fn test_intersection_with_empty_member() {
        let result = intersection(&[strings(&["amd64"]), Vec::new()]);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_retry_on_conflict_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_on_conflict(5, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ControllerError::Store(StoreError::Conflict("stale".to_string())))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_gives_up_at_ceiling() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ControllerError::Store(StoreError::Conflict("stale".to_string()))) }
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_returns_other_errors_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_on_conflict(5, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ControllerError::Store(StoreError::NotFound("gone".to_string()))) }
        })
        .await;

        assert!(matches!(
            result,
            Err(ControllerError::Store(StoreError::NotFound(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
