use chrono::Local;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::{PanelError, PanelResult};

/// Port HTTPS des entrées `domain`
pub const SITE_PORT: u16 = 443;
const ADDTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accès au registre des sites, utilisé par le consommateur d'enregistrement
pub trait SiteRegistry: Send + Sync {
    fn site_exists(&self, name: &str) -> PanelResult<bool>;

    /// Crée le site et ses deux domaines (nu et joker) en une transaction.
    /// Renvoie l'id du site.
    fn register_site(&self, name: &str) -> PanelResult<i64>;
}

/// Ligne `sites` à insérer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSite {
    pub name: String,
    pub path: String,
    pub status: String,
    pub ps: String,
    pub addtime: String,
}

impl NewSite {
    /// Valeurs par défaut d'un site créé automatiquement
    pub fn with_defaults(name: &str, site_root: &str) -> Self {
        Self {
            name: name.to_string(),
            path: site_root.to_string(),
            status: "1".to_string(),
            ps: name.to_string(),
            addtime: Local::now().format(ADDTIME_FORMAT).to_string(),
        }
    }
}

/// Registre SQLite (thread-safe via Mutex)
pub struct PanelRegistry {
    conn: Mutex<Connection>,
    site_root: String,
}

impl PanelRegistry {
    pub fn open(db_path: &Path, site_root: &str) -> PanelResult<Self> {
        let conn = Connection::open(db_path)?;
        // Le panneau écrit dans la même base
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::from_connection(conn, site_root)
    }

    pub fn from_connection(conn: Connection, site_root: &str) -> PanelResult<Self> {
        Self::ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            site_root: site_root.to_string(),
        })
    }

    /// Tables minimales compatibles avec celles du panneau
    fn ensure_schema(conn: &Connection) -> PanelResult<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sites (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                path TEXT,
                status TEXT,
                `index` TEXT,
                ps TEXT,
                addtime TEXT
            );
            CREATE TABLE IF NOT EXISTS domain (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pid INTEGER,
                name TEXT,
                port INTEGER,
                addtime TEXT
            );",
        )?;
        Ok(())
    }

    fn conn(&self) -> PanelResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| PanelError::Poisoned)
    }

    /// Insère le site et ses domaines ; rien n'est écrit en cas d'erreur
    pub fn save_site(&self, site: &NewSite) -> PanelResult<i64> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO sites (`name`, `path`, `status`, `ps`, `addtime`) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![site.name, site.path, site.status, site.ps, site.addtime],
        )?;
        let site_id = tx.last_insert_rowid();

        let wildcard = format!("*.{}", site.name);
        tx.execute(
            "INSERT INTO domain (`pid`, `name`, `port`, `addtime`) VALUES (?1, ?2, ?3, ?4), (?1, ?5, ?3, ?4)",
            params![site_id, site.name, SITE_PORT, site.addtime, wildcard],
        )?;

        tx.commit()?;
        info!(site = %site.name, site_id, "Site enregistré dans le panneau");
        Ok(site_id)
    }

    /// Domaines rattachés à un site
    pub fn domains_of(&self, site_id: i64) -> PanelResult<Vec<(String, u16)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name, port FROM domain WHERE pid = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![site_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl SiteRegistry for PanelRegistry {
    fn site_exists(&self, name: &str) -> PanelResult<bool> {
        let conn = self.conn()?;
        let id: Option<i64> = conn
            .query_row("SELECT id FROM sites WHERE name = ?1", params![name], |row| row.get(0))
            .optional()?;
        debug!(site = %name, exists = id.is_some(), "Recherche du site");
        Ok(id.is_some())
    }

    fn register_site(&self, name: &str) -> PanelResult<i64> {
        self.save_site(&NewSite::with_defaults(name, &self.site_root))
    }
}
