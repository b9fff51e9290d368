//! Per-domain nginx vhost rendering.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to create {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Replace `{domain}`, `{crt}` and `{key}` verbatim
pub fn render_template(template: &str, domain: &str, crt: &Path, key: &Path) -> String {
    template
        .replace("{domain}", domain)
        .replace("{crt}", &crt.to_string_lossy())
        .replace("{key}", &key.to_string_lossy())
}

/// Render and write `<dir>/<domain>.conf`, creating `dir` if needed
pub fn write_proxy_config(
    dir: &Path,
    template: &str,
    domain: &str,
    crt: &Path,
    key: &Path,
) -> Result<PathBuf, RenderError> {
    std::fs::create_dir_all(dir).map_err(|source| RenderError::CreateDir {
        path: dir.display().to_string(),
        source,
    })?;

    let path = dir.join(format!("{}.conf", domain));
    std::fs::write(&path, render_template(template, domain, crt, key)).map_err(|source| {
        RenderError::Write {
            path: path.display().to_string(),
            source,
        }
    })?;
    Ok(path)
}
