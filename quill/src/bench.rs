//! `quill lock-bench`: contention test for the distributed lock.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use config::Config;
use rate_limit::DistributedLock;
use tokio::time::Instant;

pub(crate) struct Options {
    pub tasks: usize,
    pub iterations: usize,
    pub name: String,
    pub ttl: Duration,
    pub wait: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct Report {
    pub acquired: usize,
    pub misses: usize,
    /// Times a task found someone else inside the critical section.
    pub violations: usize,
    pub elapsed: Duration,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock bench finished in {:?}: {} acquired, {} misses, {} violations",
            self.elapsed, self.acquired, self.misses, self.violations
        )
    }
}

#[derive(Default)]
struct Counters {
    inside: AtomicUsize,
    acquired: AtomicUsize,
    misses: AtomicUsize,
    violations: AtomicUsize,
}

pub(crate) async fn run(config: &Config, options: Options) -> anyhow::Result<Report> {
    let store = rate_limit::connect(&config.server.rate_limit.storage).await?;
    let lock = DistributedLock::new(store, options.ttl)?;

    log::info!(
        "Running lock bench on {} with {} tasks x {} iterations",
        options.name,
        options.tasks,
        options.iterations
    );

    Ok(contend(lock, options).await?)
}

async fn contend(lock: DistributedLock, options: Options) -> Result<Report, rate_limit::LockError> {
    let counters = Arc::new(Counters::default());
    let name: Arc<str> = options.name.into();
    let start = Instant::now();

    let mut handles = Vec::with_capacity(options.tasks);

    for _ in 0..options.tasks {
        let lock = lock.clone();
        let counters = counters.clone();
        let name = name.clone();
        let (iterations, wait) = (options.iterations, options.wait);

        handles.push(tokio::spawn(async move {
            for _ in 0..iterations {
                let Some(guard) = lock.acquire(&name, wait).await? else {
                    counters.misses.fetch_add(1, Ordering::SeqCst);
                    continue;
                };

                if counters.inside.fetch_add(1, Ordering::SeqCst) != 0 {
                    counters.violations.fetch_add(1, Ordering::SeqCst);
                }

                tokio::task::yield_now().await;

                counters.inside.fetch_sub(1, Ordering::SeqCst);
                counters.acquired.fetch_add(1, Ordering::SeqCst);

                lock.release(guard).await?;
            }

            Ok::<_, rate_limit::LockError>(())
        }));
    }

    for handle in handles {
        match handle.await {
            Ok(result) => result?,
            Err(e) => log::error!("Lock bench task failed: {e}"),
        }
    }

    Ok(Report {
        acquired: counters.acquired.load(Ordering::SeqCst),
        misses: counters.misses.load(Ordering::SeqCst),
        violations: counters.violations.load(Ordering::SeqCst),
        elapsed: start.elapsed(),
    })
}
