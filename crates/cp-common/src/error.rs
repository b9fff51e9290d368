use thiserror::Error;

/// Erreurs de chargement ou de validation de la configuration.
///
/// Toutes ces erreurs sont fatales : la passe s'arrête avant le moindre appel réseau.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("CA account email is empty")]
    MissingEmail,

    #[error("CA account email is malformed: {0}")]
    MalformedEmail(String),

    #[error("CA name is empty")]
    MissingCaName,

    #[error("CA name must be letsencrypt or zerossl, got {0:?}")]
    InvalidCaName(String),

    #[error("CA name {name} does not match CA url {url}")]
    CaUrlMismatch { name: String, url: String },

    #[error("CA {0} requires eab_kid and eab_hmac_key")]
    MissingEab(String),

    #[error("Registrar credentials are not configured")]
    MissingRegistrarCredentials,

    #[error("parallel_count must be at least 1")]
    InvalidParallelCount,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
