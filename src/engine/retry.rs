use std::future::Future;

use super::EngineError;

/// Run `attempt` and, if it fails with a serialization conflict or a lock
/// timeout, run it exactly once more. Each call must open a fresh transaction.
pub(super) async fn retry_once<T, F, Fut>(op: &'static str, mut attempt: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    match attempt().await {
        Err(e) if e.is_retriable() => {
            tracing::debug!(op, error = %e, "retrying in a fresh transaction");
            metrics::counter!(crate::observability::RETRIES_TOTAL, "op" => op).increment(1);
            attempt().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_conflict_once() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_once("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::SerializationConflict)
        })
        .await;
        assert!(matches!(result, Err(EngineError::SerializationConflict)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let calls = &AtomicU32::new(0);
        let result = retry_once("test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(EngineError::TransactionTimeout)
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<(), _> = retry_once("test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::InvalidTimeRange)
        })
        .await;
        assert!(matches!(result, Err(EngineError::InvalidTimeRange)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
