//! Registre des sites du panneau (base SQLite du panneau d'hébergement).

pub mod sites;

pub use sites::{NewSite, PanelRegistry, SiteRegistry, SITE_PORT};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PanelError {
    #[error("Erreur SQLite : {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Verrou de la base empoisonné")]
    Poisoned,
}

pub type PanelResult<T> = Result<T, PanelError>;
