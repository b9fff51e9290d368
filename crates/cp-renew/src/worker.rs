//! Renewal of a single domain: obtain, persist, render, enqueue.

use std::path::PathBuf;

use cp_acme::{AcmeError, StoreError, EXT_CERT, EXT_KEY};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::context::RunContext;
use crate::render::{self, RenderError};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("obtain failed: {0}")]
    Obtain(#[source] AcmeError),

    #[error("save failed: {0}")]
    Save(#[source] StoreError),

    #[error("cannot resolve certificate paths: {0}")]
    Paths(#[source] StoreError),

    #[error("proxy config failed: {0}")]
    Render(#[from] RenderError),

    #[error("registration queue closed")]
    QueueClosed,
}

impl WorkerError {
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Obtain(_) => "obtain",
            Self::Save(_) => "save",
            Self::Paths(_) => "paths",
            Self::Render(_) => "render",
            Self::QueueClosed => "enqueue",
        }
    }
}

/// Names requested for a domain: the bare name and its wildcard
pub fn certificate_names(domain: &str) -> Vec<String> {
    vec![domain.to_string(), format!("*.{}", domain)]
}

/// Run every step for `domain`. Errors are logged and counted here and
/// never escape the worker.
pub async fn process(ctx: &RunContext, domain: &str, queue: &mpsc::Sender<String>) -> Result<PathBuf, WorkerError> {
    let result = renew(ctx, domain, queue).await;
    if let Err(e) = &result {
        match e {
            WorkerError::Obtain(_) => ctx.counters.record_obtain_failure(),
            WorkerError::Save(_) => ctx.counters.record_save_failure(),
            _ => {}
        }
        error!(domain = %domain, phase = e.phase(), error = %e, "Renewal failed");
    }
    result
}

async fn renew(ctx: &RunContext, domain: &str, queue: &mpsc::Sender<String>) -> Result<PathBuf, WorkerError> {
    let existing_key = match ctx.store.read_key(domain) {
        Ok(key) => Some(key),
        Err(e) => {
            debug!(domain = %domain, error = %e, "No reusable private key");
            None
        }
    };

    let resource = ctx
        .ca
        .obtain(&certificate_names(domain), true, existing_key.as_deref())
        .await
        .map_err(WorkerError::Obtain)?;

    ctx.store.save_resource(&resource).map_err(WorkerError::Save)?;

    let crt = ctx.store.absolute_path_for(domain, EXT_CERT).map_err(WorkerError::Paths)?;
    let key = ctx.store.absolute_path_for(domain, EXT_KEY).map_err(WorkerError::Paths)?;

    let conf = render::write_proxy_config(&ctx.settings.vhost_dir, &ctx.settings.template, domain, &crt, &key)?;

    queue
        .send(domain.to_string())
        .await
        .map_err(|_| WorkerError::QueueClosed)?;

    info!(domain = %domain, conf = %conf.display(), "Certificate renewed");
    Ok(conf)
}
