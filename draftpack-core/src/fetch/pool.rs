//! Bounded-concurrency fan-out over a list of fetch jobs.
//!
//! Individual failures never abort siblings; every job reports back with
//! its own result and the caller decides what a partial success means.
//! The progress callback is serialized by running it on the single task
//! that drains the join set, so observers see monotone counts.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::{AssetFetcher, FetchError, MaterialFetchJob};

pub const DEFAULT_MAX_PARALLEL: usize = 16;

#[derive(Debug)]
pub struct FetchOutcome {
    pub job: MaterialFetchJob,
    pub result: Result<(), FetchError>,
}

#[derive(Debug, Clone, Copy)]
pub struct PoolProgress {
    pub done: usize,
    pub total: usize,
}

/// Generic fan-out used by [`DownloadPool`]; split out so the scheduling
/// behavior can be exercised without network-backed jobs.
pub async fn fan_out<R, Fut, P>(
    jobs: Vec<MaterialFetchJob>,
    max_parallel: usize,
    cancel: Arc<AtomicBool>,
    run: R,
    mut on_progress: P,
) -> Vec<FetchOutcome>
where
    R: Fn(MaterialFetchJob) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), FetchError>> + Send + 'static,
    P: FnMut(PoolProgress, Option<&FetchError>),
{
    let total = jobs.len();
    let semaphore = Arc::new(Semaphore::new(max_parallel.max(1)));
    let run = Arc::new(run);
    let mut set = JoinSet::new();

    for job in jobs {
        let semaphore = Arc::clone(&semaphore);
        let cancel = Arc::clone(&cancel);
        let run = Arc::clone(&run);
        set.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    return FetchOutcome {
                        job,
                        result: Err(FetchError::Cancelled),
                    }
                }
            };
            // A tripped cancel flag stops new starts; jobs already past
            // this point drain naturally.
            if cancel.load(Ordering::SeqCst) {
                return FetchOutcome {
                    job,
                    result: Err(FetchError::Cancelled),
                };
            }
            let result = run(job.clone()).await;
            FetchOutcome { job, result }
        });
    }

    let mut outcomes = Vec::with_capacity(total);
    let mut done = 0usize;
    while let Some(joined) = set.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "download task panicked");
                continue;
            }
        };
        done += 1;
        on_progress(PoolProgress { done, total }, outcome.result.as_ref().err());
        outcomes.push(outcome);
    }
    outcomes
}

#[derive(Clone)]
pub struct DownloadPool {
    fetcher: AssetFetcher,
    max_parallel: usize,
}

impl DownloadPool {
    pub fn new(fetcher: AssetFetcher, max_parallel: usize) -> Self {
        Self {
            fetcher,
            max_parallel: max_parallel.max(1),
        }
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    /// Runs every job through the asset fetcher, at most `max_parallel`
    /// in flight, invoking `on_progress` in completion order.
    pub async fn run<P>(
        &self,
        jobs: Vec<MaterialFetchJob>,
        cancel: Arc<AtomicBool>,
        on_progress: P,
    ) -> Vec<FetchOutcome>
    where
        P: FnMut(PoolProgress, Option<&FetchError>),
    {
        let fetcher = self.fetcher.clone();
        fan_out(
            jobs,
            self.max_parallel,
            cancel,
            move |job: MaterialFetchJob| {
                let fetcher = fetcher.clone();
                async move {
                    fetcher
                        .fetch(&job.remote_url, &job.local_target_path, job.kind)
                        .await
                }
            },
            on_progress,
        )
        .await
    }
}
