//! Deadline helper for provider calls

use crate::errors::{AppError, Result};
use std::future::Future;
use std::time::Duration;

/// Await `fut`, mapping an elapsed deadline through `on_timeout(timeout_ms)`
pub async fn with_timeout<T, F>(
    timeout: Duration,
    fut: F,
    on_timeout: impl FnOnce(u64) -> AppError,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(timeout.as_millis() as u64)),
    }
}

/// Embedding call bounded by `timeout`
pub async fn embedding_deadline<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(timeout, fut, |timeout_ms| AppError::EmbeddingTimeout { timeout_ms }).await
}

/// Chat model call bounded by `timeout`
pub async fn llm_deadline<T, F>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(timeout, fut, |timeout_ms| AppError::LlmTimeout { timeout_ms }).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let result: Result<()> = llm_deadline(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(AppError::LlmTimeout { timeout_ms: 50 })));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let ok = embedding_deadline(Duration::from_secs(1), async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }
}
