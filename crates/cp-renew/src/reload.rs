//! Post-run reload of the reverse proxy.

use async_trait::async_trait;
use cp_common::config::split_command;
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ReloadError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {output}")]
    Failed {
        program: String,
        status: String,
        output: String,
    },
}

/// Applies the freshly written configuration. Called at most once per run.
#[async_trait]
pub trait Reloader: Send + Sync {
    /// Returns the combined stdout/stderr of the reload on success
    async fn reload(&self) -> Result<String, ReloadError>;
}

/// Runs `<program> <args>` as an external process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReloader {
    program: String,
    args: Vec<String>,
}

impl CommandReloader {
    /// The argument string is split on whitespace
    pub fn new(program: &str, args: Option<&str>) -> Self {
        Self {
            program: program.to_string(),
            args: args
                .map(|a| a.split_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    /// `None` for an empty command
    pub fn from_command(cmd: &str) -> Option<Self> {
        split_command(cmd).map(|(program, args)| Self::new(&program, args.as_deref()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl Reloader for CommandReloader {
    async fn reload(&self) -> Result<String, ReloadError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|source| ReloadError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(ReloadError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                output: combined,
            });
        }
        Ok(combined)
    }
}
