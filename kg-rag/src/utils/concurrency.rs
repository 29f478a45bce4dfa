//! Concurrency helpers for fan-out over external services.

use crate::errors::{Result, ServiceError};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::time::Duration;

/// Await `fut`, failing with [`ServiceError::Timeout`] once `after` elapses.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout { operation, after }.into()),
    }
}

/// Map `items` through `f` with at most `limit` futures in flight.
///
/// Output order matches input order. The first error is returned and the
/// remaining in-flight futures are dropped.
pub async fn bounded_try_map<I, T, U, F, Fut>(items: I, limit: usize, f: F) -> Result<Vec<U>>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<U>>,
{
    stream::iter(items)
        .map(f)
        .buffered(limit.max(1))
        .try_collect()
        .await
}
