//! Combinators over sets of fallible futures.

use std::future::Future;

use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};

/// Resolve with the first `Ok`, dropping the futures still running.
/// If every future fails, return all errors in input order.
pub async fn race_to_success<I, F, T, E>(futures: I) -> Result<T, Vec<E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let mut running: FuturesUnordered<_> = futures
        .into_iter()
        .enumerate()
        .map(|(index, fut)| async move { (index, fut.await) })
        .collect();

    let mut errors = Vec::new();
    while let Some((index, outcome)) = running.next().await {
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => errors.push((index, e)),
        }
    }
    errors.sort_by_key(|(index, _)| *index);
    Err(errors.into_iter().map(|(_, e)| e).collect())
}

/// Await every future and keep only the successes, in input order.
pub async fn all_successes<I, F, T, E>(futures: I) -> Vec<T>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    join_all(futures)
        .await
        .into_iter()
        .filter_map(Result::ok)
        .collect()
}
