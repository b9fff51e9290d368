//! Single consumer syncing renewed domains into the panel registry.

use std::sync::Arc;

use cp_panel::{PanelResult, SiteRegistry};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SinkReport {
    /// Newly created sites, in queue order
    pub registered: Vec<String>,
    pub already_present: usize,
    pub failed: usize,
}

/// Start the sink. The returned receiver resolves once the queue is closed and
/// fully drained.
pub fn spawn_sink(registry: Arc<dyn SiteRegistry>, queue: mpsc::Receiver<String>) -> oneshot::Receiver<SinkReport> {
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        let report = drain(registry, queue).await;
        if done_tx.send(report).is_err() {
            debug!("Drain signal dropped, controller gone");
        }
    });
    done_rx
}

enum SyncOutcome {
    Registered(i64),
    AlreadyPresent,
}

/// Register each queued domain that the panel does not know yet.
///
/// Registry calls block on SQLite (up to the panel's busy timeout), so each
/// one runs on the blocking pool.
pub async fn drain(registry: Arc<dyn SiteRegistry>, mut queue: mpsc::Receiver<String>) -> SinkReport {
    let mut report = SinkReport::default();

    while let Some(domain) = queue.recv().await {
        let registry = registry.clone();
        let name = domain.clone();
        let outcome = tokio::task::spawn_blocking(move || sync_site(registry.as_ref(), &name)).await;

        match outcome {
            Ok(Ok(SyncOutcome::Registered(site_id))) => {
                debug!(domain = %domain, site_id, "Site registered");
                report.registered.push(domain);
            }
            Ok(Ok(SyncOutcome::AlreadyPresent)) => {
                debug!(domain = %domain, "Site already registered");
                report.already_present += 1;
            }
            Ok(Err(e)) => {
                error!(domain = %domain, error = %e, "Save site failed");
                report.failed += 1;
            }
            Err(e) => {
                error!(domain = %domain, error = %e, "Site registration task panicked");
                report.failed += 1;
            }
        }
    }

    info!(
        registered = report.registered.len(),
        already_present = report.already_present,
        failed = report.failed,
        "Registration queue drained"
    );
    report
}

fn sync_site(registry: &dyn SiteRegistry, domain: &str) -> PanelResult<SyncOutcome> {
    if registry.site_exists(domain)? {
        return Ok(SyncOutcome::AlreadyPresent);
    }
    registry.register_site(domain).map(SyncOutcome::Registered)
}
