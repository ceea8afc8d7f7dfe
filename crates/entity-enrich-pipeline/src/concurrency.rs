//! Bounded fan-out, retry-with-backoff, and the batch-vs-direct decision.
//!
//! A semaphore-bounded `buffer_unordered` fan-out plus an exponential
//! backoff retry loop, used to bound concurrent scraping/LLM calls per run.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use entity_enrich_clients::traits::{BatchProcessingStatus, BatchRequestItem, BatchResultItem, LlmClient, MessageRequest, MessageResponse};
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Semaphore};
use tracing::warn;

use crate::error::{Error, Result as PhaseResult};

/// Upper bound on concurrent direct-mode units of work, regardless of phase.
pub const MAX_DIRECT_CONCURRENCY: usize = 10;

/// Per-tier small-batch thresholds: below this item count, run concurrent
/// direct calls instead of submitting to the batch API.
#[derive(Debug, Clone, Copy)]
pub struct BatchThresholds {
    pub classify: usize,
    pub t1: usize,
    pub t2: usize,
    pub t3: usize,
}

impl Default for BatchThresholds {
    fn default() -> Self {
        Self {
            classify: 20,
            t1: 20,
            t2: 10,
            t3: 5,
        }
    }
}

/// Whether a given step of `n` LLM-bearing items should run as concurrent
/// direct calls or be submitted to the batch API.
pub fn should_run_direct(n: usize, threshold: usize, no_batch: bool) -> bool {
    no_batch || n <= threshold
}

/// Cooperative cancellation signal threaded through every I/O-bearing async
/// function. Cloning shares the same underlying flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    pub fn new() -> (Self, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancellationToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl CancellationToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Run `items` through `work` with at most `max_concurrency` in flight at
/// once, short-circuiting new dispatches once cancellation fires. Already
/// in-flight work is allowed to drain rather than being aborted mid-flight.
pub async fn bounded_fan_out<T, F, Fut, R>(items: Vec<T>, max_concurrency: usize, cancel: CancellationToken, work: F) -> Vec<R>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send,
    R: Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let work = Arc::new(work);
    let tasks: Vec<_> = items
        .into_iter()
        .map(|item| {
            let sem = semaphore.clone();
            let work = work.clone();
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return None;
                }
                let _permit = sem.acquire().await.expect("semaphore never closed while held");
                Some(work(item).await)
            }
        })
        .collect();

    stream::iter(tasks)
        .buffer_unordered(max_concurrency.max(1))
        .filter_map(|r| async move { r })
        .collect()
        .await
}

/// Exponential backoff retry: 3 attempts, starting at 500ms and doubling.
/// Aborts early if cancellation fires between attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(cancel: &CancellationToken, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    const MAX_ATTEMPTS: u32 = 3;
    const INITIAL_BACKOFF: Duration = Duration::from_millis(500);

    let mut backoff = INITIAL_BACKOFF;
    let mut last_err = None;
    for attempt_number in 0..MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            break;
        }
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt = attempt_number, error = %e, "attempt failed, retrying");
                last_err = Some(e);
                if attempt_number + 1 < MAX_ATTEMPTS && !cancel.is_cancelled() {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

/// Stable `custom_id` for rejoining batch results to their originating
/// input even when some entries are missing from the response.
pub fn custom_id(prefix: &str, index: usize, question_id: &str) -> String {
    format!("{prefix}-{index}-{question_id}")
}

const MAX_POLL_ATTEMPTS: u32 = 20;
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Poll a submitted batch until it reaches [`BatchProcessingStatus::Ended`],
/// retrying transient `get_batch` failures via [`retry_with_backoff`].
/// Bounded by `MAX_POLL_ATTEMPTS` so a stuck batch eventually surfaces as
/// [`Error::BatchTimedOut`] instead of polling forever.
async fn poll_batch_until_ended(llm: &Arc<dyn LlmClient>, batch_id: &str, cancel: &CancellationToken) -> PhaseResult<()> {
    for _ in 0..MAX_POLL_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let handle = retry_with_backoff(cancel, || llm.get_batch(batch_id)).await.map_err(|e| Error::BatchSubmission(e.to_string()))?;
        match handle.processing_status {
            BatchProcessingStatus::Ended => return Ok(()),
            BatchProcessingStatus::Canceling => return Err(Error::BatchSubmission(format!("batch {batch_id} was canceled before completing"))),
            BatchProcessingStatus::InProgress => tokio::time::sleep(POLL_INTERVAL).await,
        }
    }
    Err(Error::BatchTimedOut(batch_id.to_string()))
}

/// Submit `items` as a single batch, poll it to completion, and rejoin each
/// result back to its originating item by `custom_id`. On any submission,
/// polling, or fetch failure every item comes back `Err(Error::BatchSubmission)`;
/// an item absent from the batch results (or with neither a message nor an
/// error) is treated the same way rather than silently dropped.
async fn dispatch_via_batch<T, ReqFn, IdFn>(
    llm: &Arc<dyn LlmClient>,
    items: Vec<T>,
    id_prefix: &str,
    cancel: CancellationToken,
    to_request: ReqFn,
    id_component: IdFn,
) -> Vec<(T, PhaseResult<MessageResponse>)>
where
    ReqFn: Fn(&T) -> MessageRequest,
    IdFn: Fn(&T) -> String,
{
    let ids: Vec<String> = items.iter().enumerate().map(|(i, item)| custom_id(id_prefix, i, &id_component(item))).collect();
    let batch_items: Vec<BatchRequestItem> = items.iter().zip(&ids).map(|(item, cid)| BatchRequestItem { custom_id: cid.clone(), params: to_request(item) }).collect();

    let outcome: PhaseResult<Vec<BatchResultItem>> = async {
        let handle = retry_with_backoff(&cancel, || {
            let batch_items = batch_items.clone();
            async move { llm.create_batch(batch_items).await }
        })
        .await
        .map_err(|e| Error::BatchSubmission(e.to_string()))?;

        poll_batch_until_ended(llm, &handle.id, &cancel).await?;

        retry_with_backoff(&cancel, || llm.get_batch_results(&handle.id)).await.map_err(|e| Error::BatchSubmission(e.to_string()))
    }
    .await;

    match outcome {
        Ok(results) => {
            let mut by_custom_id: HashMap<String, BatchResultItem> = results.into_iter().map(|r| (r.custom_id.clone(), r)).collect();
            items
                .into_iter()
                .zip(ids)
                .map(|(item, cid)| {
                    let result = match by_custom_id.remove(&cid) {
                        Some(BatchResultItem { message: Some(message), .. }) => Ok(message),
                        Some(BatchResultItem { error: Some(error), .. }) => Err(Error::BatchSubmission(error)),
                        Some(_) => Err(Error::BatchSubmission(format!("batch item {cid} returned neither a message nor an error"))),
                        None => Err(Error::BatchSubmission(format!("batch item {cid} missing from batch results"))),
                    };
                    (item, result)
                })
                .collect()
        }
        Err(e) => {
            let msg = e.to_string();
            items.into_iter().map(|item| (item, Err(Error::BatchSubmission(msg.clone())))).collect()
        }
    }
}

/// Dispatch one LLM call per item, choosing direct (concurrent,
/// retry-wrapped) or batch execution per [`should_run_direct`]. `id_prefix`
/// and `id_component` feed [`custom_id`] so batch results can be rejoined to
/// their originating item; `id_component` is unused in direct mode.
pub async fn dispatch_llm<T, ReqFn, IdFn>(
    llm: &Arc<dyn LlmClient>,
    items: Vec<T>,
    id_prefix: &str,
    threshold: usize,
    no_batch: bool,
    max_concurrency: usize,
    cancel: CancellationToken,
    to_request: ReqFn,
    id_component: IdFn,
) -> Vec<(T, PhaseResult<MessageResponse>)>
where
    T: Send + 'static,
    ReqFn: Fn(&T) -> MessageRequest + Send + Sync + 'static,
    IdFn: Fn(&T) -> String,
{
    if should_run_direct(items.len(), threshold, no_batch) {
        let llm = llm.clone();
        let to_request = Arc::new(to_request);
        bounded_fan_out(items, max_concurrency, cancel.clone(), move |item| {
            let llm = llm.clone();
            let to_request = to_request.clone();
            let cancel = cancel.clone();
            async move {
                let request = to_request(&item);
                let result = retry_with_backoff(&cancel, || {
                    let llm = llm.clone();
                    let request = request.clone();
                    async move { llm.create_message(request).await }
                })
                .await
                .map_err(Error::from);
                (item, result)
            }
        })
        .await
    } else {
        dispatch_via_batch(llm, items, id_prefix, cancel, to_request, id_component).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entity_enrich_clients::fakes::FakeLlmClient;
    use entity_enrich_clients::traits::Usage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn direct_mode_chosen_below_threshold() {
        assert!(should_run_direct(5, 20, false));
        assert!(!should_run_direct(25, 20, false));
        assert!(should_run_direct(25, 20, true));
    }

    #[tokio::test]
    async fn bounded_fan_out_processes_all_items() {
        let (_handle, token) = CancellationHandle::new();
        let results = bounded_fan_out(vec![1, 2, 3, 4, 5], 2, token, |x| async move { x * 2 }).await;
        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![2, 4, 6, 8, 10]);
    }

    #[tokio::test]
    async fn cancelled_fan_out_skips_new_dispatches() {
        let (handle, token) = CancellationHandle::new();
        handle.cancel();
        let results = bounded_fan_out(vec![1, 2, 3], 2, token, |x| async move { x }).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn retry_with_backoff_succeeds_after_failures() {
        let (_handle, token) = CancellationHandle::new();
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_with_backoff(&token, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { Err("transient") } else { Ok("ok") } }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_with_backoff_exhausts_after_max_attempts() {
        let (_handle, token) = CancellationHandle::new();
        let attempts = AtomicUsize::new(0);
        let result: Result<&str, &str> = retry_with_backoff(&token, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err("permanent") }
        })
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn custom_id_encodes_prefix_index_and_question() {
        assert_eq!(custom_id("t1", 3, "q-industry"), "t1-3-q-industry");
    }

    fn request_for(item: &&str) -> MessageRequest {
        MessageRequest {
            model: "haiku".to_string(),
            system: None,
            user: item.to_string(),
            max_tokens: 64,
            cache_ttl: None,
        }
    }

    #[tokio::test]
    async fn dispatch_llm_runs_direct_below_threshold() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new().with_response("haiku", "a", MessageResponse { text: "a-reply".to_string(), usage: Usage::default() }));
        let (_handle, token) = CancellationHandle::new();
        let results = dispatch_llm(&llm, vec!["a"], "test", 20, false, 10, token, request_for, |item| item.to_string()).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1.as_ref().unwrap().text, "a-reply");
    }

    #[tokio::test]
    async fn dispatch_llm_submits_as_batch_above_threshold() {
        let llm: Arc<dyn LlmClient> = Arc::new(
            FakeLlmClient::new()
                .with_response("haiku", "a", MessageResponse { text: "a-reply".to_string(), usage: Usage::default() })
                .with_response("haiku", "b", MessageResponse { text: "b-reply".to_string(), usage: Usage::default() }),
        );
        let (_handle, token) = CancellationHandle::new();
        let results = dispatch_llm(&llm, vec!["a", "b"], "test", 1, false, 10, token, request_for, |item| item.to_string()).await;
        let by_item: HashMap<&str, String> = results.into_iter().map(|(item, result)| (item, result.unwrap().text)).collect();
        assert_eq!(by_item.get("a"), Some(&"a-reply".to_string()));
        assert_eq!(by_item.get("b"), Some(&"b-reply".to_string()));
    }

    #[tokio::test]
    async fn dispatch_llm_batch_items_missing_a_scripted_response_come_back_as_errors() {
        let llm: Arc<dyn LlmClient> = Arc::new(FakeLlmClient::new());
        let (_handle, token) = CancellationHandle::new();
        let results = dispatch_llm(&llm, vec!["unscripted"], "test", 0, false, 10, token, request_for, |item| item.to_string()).await;
        assert!(results[0].1.is_err());
    }
}
