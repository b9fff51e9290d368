use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cp_acme::{CertificateAuthority, CertificateStore};
use cp_common::RenewConfig;
use cp_panel::SiteRegistry;

use crate::reload::Reloader;

/// Knobs of one run, copied out of the configuration
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub parallel_count: usize,
    pub dispatch_delay: Duration,
    pub dispatch_cap: usize,
    pub queue_capacity: usize,
    pub vhost_dir: PathBuf,
    pub template: String,
}

impl RunSettings {
    pub fn from_config(config: &RenewConfig) -> Self {
        Self {
            parallel_count: config.parallel_count.max(1),
            dispatch_delay: config.dispatch_delay(),
            dispatch_cap: config.dispatch_cap,
            queue_capacity: config.effective_queue_capacity(),
            vhost_dir: config.bt_vhost_dir.clone(),
            template: config.nginx_conf_tpl.clone(),
        }
    }
}

/// Failure counts of a run. Only incremented by workers, read once the pool
/// has joined.
#[derive(Debug, Default)]
pub struct RunCounters {
    failed_obtain: AtomicU64,
    failed_save: AtomicU64,
}

impl RunCounters {
    pub fn record_obtain_failure(&self) {
        self.failed_obtain.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_save_failure(&self) {
        self.failed_save.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failed_obtain(&self) -> u64 {
        self.failed_obtain.load(Ordering::Relaxed)
    }

    pub fn failed_save(&self) -> u64 {
        self.failed_save.load(Ordering::Relaxed)
    }
}

/// External services a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub ca: Arc<dyn CertificateAuthority>,
    pub registry: Arc<dyn SiteRegistry>,
    /// `None` when no reload command is configured
    pub reloader: Option<Arc<dyn Reloader>>,
}

/// Everything a run needs, built fresh for each run and shared by reference
pub struct RunContext {
    pub settings: RunSettings,
    pub store: CertificateStore,
    pub ca: Arc<dyn CertificateAuthority>,
    pub registry: Arc<dyn SiteRegistry>,
    pub reloader: Option<Arc<dyn Reloader>>,
    pub counters: RunCounters,
}

impl RunContext {
    pub fn new(settings: RunSettings, store: CertificateStore, collaborators: Collaborators) -> Self {
        Self {
            settings,
            store,
            ca: collaborators.ca,
            registry: collaborators.registry,
            reloader: collaborators.reloader,
            counters: RunCounters::default(),
        }
    }
}
