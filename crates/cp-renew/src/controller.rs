//! One renewal pass: validate, dispatch, drain, reload.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use cp_acme::CertificateStore;
use cp_common::config::read_domains;
use cp_common::RenewConfig;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::context::{Collaborators, RunContext, RunSettings};
use crate::pool::{self, DispatchSummary};
use crate::sink::{self, SinkReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Validating,
    Dispatching,
    Draining,
    ReloadTriggered,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Validating => "Validating",
            Self::Dispatching => "Dispatching",
            Self::Draining => "Draining",
            Self::ReloadTriggered => "ReloadTriggered",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub phase: RunPhase,
    /// Set when the run aborted
    pub error: Option<String>,
    pub dispatch: DispatchSummary,
    pub sink: SinkReport,
    pub failed_obtain: u64,
    pub failed_save: u64,
    /// `None` when no reload command is configured
    pub reload_ok: Option<bool>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            error: None,
            dispatch: DispatchSummary::default(),
            sink: SinkReport::default(),
            failed_obtain: 0,
            failed_save: 0,
            reload_ok: None,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        info!(from = %self.phase, to = %phase, "Run phase");
        self.phase = phase;
    }

    fn fail(mut self, error: String) -> Self {
        error!(phase = %self.phase, error = %error, "Run aborted");
        self.enter(RunPhase::Failed);
        self.error = Some(error);
        self
    }
}

/// Builds the network-facing collaborators once the configuration is valid
#[async_trait]
pub trait CollaboratorFactory: Send + Sync {
    async fn build(&self, config: &RenewConfig) -> anyhow::Result<Collaborators>;
}

pub struct RunController<F> {
    factory: F,
}

impl<F: CollaboratorFactory> RunController<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Load the configuration file, then run
    pub async fn run_from_file(&self, config_path: &Path) -> RunReport {
        match RenewConfig::load(config_path) {
            Ok(config) => self.run(&config).await,
            Err(e) => {
                let mut report = RunReport::new();
                report.enter(RunPhase::Validating);
                report.fail(e.to_string())
            }
        }
    }

    pub async fn run(&self, config: &RenewConfig) -> RunReport {
        let mut report = RunReport::new();
        report.enter(RunPhase::Validating);

        if let Err(e) = config.validate() {
            return report.fail(e.to_string());
        }
        let domains = match read_domains(&config.domains_path) {
            Ok(domains) => domains,
            Err(e) => return report.fail(e.to_string()),
        };
        let store = CertificateStore::new(&config.certificates_dir);
        if let Err(e) = store.init() {
            return report.fail(format!("certificate store: {}", e));
        }
        let collaborators = match self.factory.build(config).await {
            Ok(c) => c,
            Err(e) => return report.fail(format!("{:#}", e)),
        };

        let ctx = Arc::new(RunContext::new(RunSettings::from_config(config), store, collaborators));

        report.enter(RunPhase::Dispatching);
        let (queue_tx, queue_rx) = mpsc::channel(ctx.settings.queue_capacity);
        let drained = sink::spawn_sink(ctx.registry.clone(), queue_rx);
        report.dispatch = pool::dispatch(ctx.clone(), &domains, queue_tx).await;

        report.enter(RunPhase::Draining);
        report.sink = match drained.await {
            Ok(sink_report) => sink_report,
            Err(_) => {
                warn!("Registration sink stopped without reporting");
                SinkReport::default()
            }
        };

        report.enter(RunPhase::ReloadTriggered);
        report.reload_ok = match &ctx.reloader {
            Some(reloader) => match reloader.reload().await {
                Ok(output) => {
                    info!(output = %output, "Reload command succeeded");
                    Some(true)
                }
                Err(e) => {
                    error!(error = %e, "Reload command failed");
                    Some(false)
                }
            },
            None => {
                info!("No reload command configured");
                None
            }
        };

        report.failed_obtain = ctx.counters.failed_obtain();
        report.failed_save = ctx.counters.failed_save();
        info!(
            failed_obtain = report.failed_obtain,
            failed_save = report.failed_save,
            "Renewal run finished"
        );

        report.enter(RunPhase::Done);
        report
    }
}
