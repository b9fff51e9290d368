mod collaborators;
mod logging;
mod scheduler;

use std::path::PathBuf;

use anyhow::Result;
use collaborators::LiveCollaborators;
use cp_common::RenewConfig;
use cp_renew::{RunController, RunPhase};
use tokio::sync::watch;
use tracing::{error, info, warn};

// ── CLI ───────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
struct Args {
    config_path: PathBuf,
    once: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Args {
    let args: Vec<String> = args.into_iter().collect();
    let mut parsed = Args {
        config_path: PathBuf::from("config.json"),
        once: false,
    };
    for i in 0..args.len() {
        if args[i] == "--config" {
            if let Some(path) = args.get(i + 1) {
                parsed.config_path = PathBuf::from(path);
            }
        }
        if let Some(path) = args[i].strip_prefix("--config=") {
            parsed.config_path = PathBuf::from(path);
        }
        if args[i] == "--once" {
            parsed.once = true;
        }
    }
    parsed
}

// ── Main ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args(std::env::args());

    // Only the log settings are needed here, each pass reloads the file
    let startup_config = RenewConfig::load(&args.config_path);
    let log_dir = file_log_dir(&startup_config);
    let _guard = logging::init(log_dir.as_deref())?;

    info!(config = %args.config_path.display(), once = args.once, "certpilot starting");
    if let Err(e) = &startup_config {
        warn!(
            config = %args.config_path.display(),
            error = %e,
            "Configuration unreadable at startup, logging to console only"
        );
    }

    let shutdown = spawn_shutdown_listener();
    let controller = RunController::new(LiveCollaborators);

    if args.once {
        let report = controller.run_from_file(&args.config_path).await;
        scheduler::log_report(&report);
        if report.phase != RunPhase::Done {
            anyhow::bail!(
                "renewal pass failed: {}",
                report.error.as_deref().unwrap_or("unknown error")
            );
        }
        return Ok(());
    }

    scheduler::run_scheduler(&controller, &args.config_path, shutdown).await;

    info!("certpilot stopped");
    Ok(())
}

/// Directory for the JSON log file, when the config asks for one
fn file_log_dir<E>(config: &Result<RenewConfig, E>) -> Option<PathBuf> {
    config
        .as_ref()
        .ok()
        .filter(|c| c.log_to_file)
        .map(|c| c.log_dir.clone())
}

/// Listen for ctrl-c from startup on, so the signal never kills a pass in
/// flight. The scheduler stops at the next gap between passes.
fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, finishing the current pass");
                let _ = tx.send(true);
            }
            Err(e) => error!(error = %e, "Cannot listen for shutdown signal"),
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Args {
        parse_args(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_parse_args() {
        assert_eq!(
            args(&["certpilot"]),
            Args {
                config_path: PathBuf::from("config.json"),
                once: false
            }
        );
        assert_eq!(
            args(&["certpilot", "--config", "/etc/certpilot.json", "--once"]),
            Args {
                config_path: PathBuf::from("/etc/certpilot.json"),
                once: true
            }
        );
        assert_eq!(
            args(&["certpilot", "--config=conf/x.json"]).config_path,
            PathBuf::from("conf/x.json")
        );
        // Dangling flag keeps the default
        assert_eq!(
            args(&["certpilot", "--config"]).config_path,
            PathBuf::from("config.json")
        );
    }

    #[test]
    fn test_unreadable_config_falls_back_to_console_logging() {
        let dir = tempfile::tempdir().unwrap();
        let missing = RenewConfig::load(&dir.path().join("absent.json"));
        assert!(missing.is_err());
        assert_eq!(file_log_dir(&missing), None);

        std::fs::write(dir.path().join("nginx_conf.tpl"), "{domain}").unwrap();
        let path = dir.path().join("config.json");
        let config = serde_json::json!({
            "ca": {
                "account_email": "ops@example.com",
                "name": "letsencrypt",
                "url": "https://acme-v02.api.letsencrypt.org/directory"
            },
            "west_username": "user",
            "west_password": "secret",
            "bt_db_path": dir.path().join("default.db"),
            "bt_vhost_dir": dir.path().join("vhost"),
            "nginx_restart_cmd": "nginx -s reload",
            "template_path": dir.path().join("nginx_conf.tpl"),
            "log_dir": dir.path().join("logs"),
            "log_to_file": true
        });
        std::fs::write(&path, config.to_string()).unwrap();
        let loaded = RenewConfig::load(&path);
        assert_eq!(file_log_dir(&loaded), Some(dir.path().join("logs")));
    }
}
