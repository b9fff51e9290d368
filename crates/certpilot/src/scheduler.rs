use std::path::Path;
use std::time::Duration;

use cp_common::RenewConfig;
use cp_renew::{CollaboratorFactory, RunController, RunPhase, RunReport};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Used when the configuration cannot be read to learn the interval
const FALLBACK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Run one pass now, then one every `run_interval_secs`. The configuration
/// is re-read before each pass so edits to the domain list or template are
/// picked up without a restart.
///
/// `shutdown` is only looked at between passes: a pass that has started runs
/// to completion, including drain and reload.
pub async fn run_scheduler<F: CollaboratorFactory>(
    controller: &RunController<F>,
    config_path: &Path,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(config = %config_path.display(), "Renewal scheduler started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let interval = match RenewConfig::load(config_path) {
            Ok(config) => {
                let report = controller.run(&config).await;
                log_report(&report);
                config.run_interval()
            }
            Err(e) => {
                error!(config = %config_path.display(), error = %e, "Cannot load configuration, pass skipped");
                FALLBACK_INTERVAL
            }
        };

        if *shutdown.borrow() {
            break;
        }

        info!(next_in_secs = interval.as_secs(), "Waiting for next renewal pass");
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            // Only `true` is ever sent. A dropped sender disables this branch.
            Ok(()) = shutdown.changed() => break,
        }
    }

    info!("Renewal scheduler stopped");
}

pub fn log_report(report: &RunReport) {
    match report.phase {
        RunPhase::Done => info!(
            dispatched = report.dispatch.dispatched,
            succeeded = report.dispatch.succeeded,
            skipped = report.dispatch.skipped,
            deferred = report.dispatch.deferred,
            registered = report.sink.registered.len(),
            failed_obtain = report.failed_obtain,
            failed_save = report.failed_save,
            reload_ok = ?report.reload_ok,
            "Renewal pass complete"
        ),
        phase => warn!(
            phase = %phase,
            error = report.error.as_deref().unwrap_or("unknown"),
            "Renewal pass did not complete"
        ),
    }
}
