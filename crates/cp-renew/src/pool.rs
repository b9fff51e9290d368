//! Bounded dispatch of renewal workers.

use std::sync::Arc;

use chrono::Utc;
use cp_acme::should_renew;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::worker;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub total: usize,
    /// Certificate still valid, nothing to do
    pub skipped: usize,
    pub dispatched: usize,
    /// Due but over the per-run cap, left for the next run
    pub deferred: usize,
    /// Workers that went through every step
    pub succeeded: usize,
}

/// Walk `domains` in order, dispatch the due ones to at most
/// `parallel_count` concurrent workers, and wait for all of them.
/// `queue` is dropped once every worker has finished.
pub async fn dispatch(ctx: Arc<RunContext>, domains: &[String], queue: mpsc::Sender<String>) -> DispatchSummary {
    let settings = &ctx.settings;
    let permits = Arc::new(Semaphore::new(settings.parallel_count));
    let mut workers = JoinSet::new();
    let mut summary = DispatchSummary {
        total: domains.len(),
        ..Default::default()
    };

    for domain in domains {
        let decision = should_renew(&ctx.store.read_certificate(domain), Utc::now());
        if !decision.should_renew() {
            debug!(domain = %domain, decision = %decision, "Skipping");
            summary.skipped += 1;
            continue;
        }

        if summary.dispatched >= settings.dispatch_cap {
            summary.deferred += 1;
            continue;
        }

        if !settings.dispatch_delay.is_zero() {
            tokio::time::sleep(settings.dispatch_delay).await;
        }

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                error!("Worker pool closed during dispatch");
                break;
            }
        };

        info!(domain = %domain, decision = %decision, "Dispatching renewal");
        summary.dispatched += 1;

        let ctx = ctx.clone();
        let queue = queue.clone();
        let domain = domain.clone();
        workers.spawn(async move {
            let _permit = permit;
            worker::process(&ctx, &domain, &queue).await.is_ok()
        });
    }

    if summary.deferred > 0 {
        warn!(
            deferred = summary.deferred,
            cap = settings.dispatch_cap,
            "Dispatch cap reached, remaining domains left for the next run"
        );
    }

    drop(queue);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(true) => summary.succeeded += 1,
            Ok(false) => {}
            Err(e) => error!(error = %e, "Renewal worker panicked"),
        }
    }
    permits.close();

    info!(
        total = summary.total,
        skipped = summary.skipped,
        dispatched = summary.dispatched,
        succeeded = summary.succeeded,
        deferred = summary.deferred,
        "All renewal workers finished"
    );
    summary
}
