use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};

static EMAIL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^\w+([-+.]\w+)*@\w+([-.]\w+)*\.\w+([-.]\w+)*$").ok());

/// Nombre minimal de places dans la file d'enregistrement des sites
pub const MIN_QUEUE_CAPACITY: usize = 50;

/// Autorité de certification supportée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaKind {
    LetsEncrypt,
    ZeroSsl,
}

impl CaKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "letsencrypt" => Some(Self::LetsEncrypt),
            "zerossl" => Some(Self::ZeroSsl),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LetsEncrypt => "letsencrypt",
            Self::ZeroSsl => "zerossl",
        }
    }

    /// ZeroSSL n'accepte que des comptes liés (External Account Binding)
    pub fn requires_eab(&self) -> bool {
        matches!(self, Self::ZeroSsl)
    }
}

/// Informations du compte ACME
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaInfo {
    /// Email du compte ACME
    #[serde(default)]
    pub account_email: String,
    /// Nom de l'autorité : "letsencrypt" ou "zerossl"
    #[serde(default)]
    pub name: String,
    /// URL du répertoire ACME
    #[serde(default)]
    pub url: String,
    /// Identifiant EAB (ZeroSSL)
    #[serde(default)]
    pub eab_kid: String,
    /// Clé HMAC EAB, base64url (ZeroSSL)
    #[serde(default)]
    pub eab_hmac_key: String,
}

impl CaInfo {
    pub fn kind(&self) -> Option<CaKind> {
        CaKind::from_name(&self.name)
    }

    pub fn has_eab(&self) -> bool {
        !self.eab_kid.is_empty() && !self.eab_hmac_key.is_empty()
    }
}

/// Configuration d'une passe de renouvellement, chargée depuis config.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenewConfig {
    pub ca: CaInfo,
    /// Identifiants de l'API DNS du registrar
    #[serde(default)]
    pub west_username: String,
    #[serde(default)]
    pub west_password: String,
    /// Nombre de renouvellements simultanés
    #[serde(default = "default_parallel_count")]
    pub parallel_count: usize,
    /// Base SQLite du panneau
    pub bt_db_path: PathBuf,
    /// Répertoire des vhosts nginx du panneau
    pub bt_vhost_dir: PathBuf,
    /// Commande de rechargement, ex. "nginx -s reload"
    #[serde(default)]
    pub nginx_restart_cmd: String,

    #[serde(default = "default_domains_path")]
    pub domains_path: PathBuf,
    #[serde(default = "default_template_path")]
    pub template_path: PathBuf,
    #[serde(default = "default_certificates_dir")]
    pub certificates_dir: PathBuf,
    #[serde(default = "default_accounts_dir")]
    pub accounts_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Écrire aussi les logs JSON dans log_dir
    #[serde(default)]
    pub log_to_file: bool,

    /// Délai avant chaque lancement de renouvellement
    #[serde(default = "default_dispatch_delay_secs")]
    pub dispatch_delay_secs: u64,
    /// Nombre maximal de renouvellements par passe (limites de l'AC)
    #[serde(default = "default_dispatch_cap")]
    pub dispatch_cap: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Intervalle entre deux passes
    #[serde(default = "default_run_interval_secs")]
    pub run_interval_secs: u64,

    /// Serveurs DNS récursifs utilisés pour trouver la zone (host:port)
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,
    #[serde(default = "default_west_api_base")]
    pub west_api_base: String,
    /// Code d'erreur du registrar pour "enregistrement déjà existant"
    #[serde(default = "default_west_duplicate_errcode")]
    pub west_duplicate_errcode: i64,
    /// Racine des sites créés dans le panneau
    #[serde(default = "default_site_root")]
    pub site_root: String,

    /// Contenu du modèle nginx, lu depuis template_path
    #[serde(skip)]
    pub nginx_conf_tpl: String,
}

fn default_parallel_count() -> usize {
    10
}
fn default_domains_path() -> PathBuf {
    PathBuf::from("domains")
}
fn default_template_path() -> PathBuf {
    PathBuf::from("nginx_conf.tpl")
}
fn default_certificates_dir() -> PathBuf {
    PathBuf::from("certificates")
}
fn default_accounts_dir() -> PathBuf {
    PathBuf::from("accounts")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_dispatch_delay_secs() -> u64 {
    5
}
fn default_dispatch_cap() -> usize {
    300
}
fn default_queue_capacity() -> usize {
    MIN_QUEUE_CAPACITY
}
fn default_run_interval_secs() -> u64 {
    12 * 60 * 60
}
fn default_nameservers() -> Vec<String> {
    vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()]
}
fn default_west_api_base() -> String {
    "https://api.west.cn/api/v2".to_string()
}
fn default_west_duplicate_errcode() -> i64 {
    50004
}
fn default_site_root() -> String {
    "/www/wwwroot/".to_string()
}

impl RenewConfig {
    /// Charge config.json puis le modèle nginx référencé par template_path.
    ///
    /// Les chemins relatifs restent relatifs au répertoire courant, comme l'outil d'origine.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = read(path)?;
        let mut config: RenewConfig = serde_json::from_str(&content)?;
        config.nginx_conf_tpl = read(&config.template_path)?;

        info!(
            config = %path.display(),
            ca = %config.ca.name,
            parallel = config.parallel_count,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Vérifications bloquantes, faites avant tout appel réseau
    pub fn validate(&self) -> ConfigResult<()> {
        let ca = &self.ca;
        if ca.account_email.is_empty() {
            return Err(ConfigError::MissingEmail);
        }
        if !EMAIL_PATTERN.as_ref().is_some_and(|re| re.is_match(&ca.account_email)) {
            return Err(ConfigError::MalformedEmail(ca.account_email.clone()));
        }
        if ca.name.is_empty() {
            return Err(ConfigError::MissingCaName);
        }
        let kind = ca
            .kind()
            .ok_or_else(|| ConfigError::InvalidCaName(ca.name.clone()))?;
        if !ca.url.contains(kind.name()) {
            return Err(ConfigError::CaUrlMismatch {
                name: ca.name.clone(),
                url: ca.url.clone(),
            });
        }
        if kind.requires_eab() && !ca.has_eab() {
            return Err(ConfigError::MissingEab(ca.name.clone()));
        }
        if self.west_username.is_empty() || self.west_password.is_empty() {
            return Err(ConfigError::MissingRegistrarCredentials);
        }
        if self.parallel_count == 0 {
            return Err(ConfigError::InvalidParallelCount);
        }
        Ok(())
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_secs(self.dispatch_delay_secs)
    }

    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }

    /// Taille effective de la file d'enregistrement (jamais sous le minimum)
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(MIN_QUEUE_CAPACITY)
    }

    /// Découpe la commande de rechargement en (programme, arguments)
    pub fn reload_directive(&self) -> Option<(String, Option<String>)> {
        split_command(&self.nginx_restart_cmd)
    }
}

/// Lit la liste des domaines : un par ligne, CR supprimés, lignes vides ignorées
pub fn read_domains(path: &Path) -> ConfigResult<Vec<String>> {
    let content = read(path)?;
    Ok(parse_domains(&content))
}

pub fn parse_domains(content: &str) -> Vec<String> {
    content
        .replace('\r', "")
        .split('\n')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

/// Sépare au premier blanc : "nginx -s reload" -> ("nginx", Some("-s reload"))
pub fn split_command(cmd: &str) -> Option<(String, Option<String>)> {
    let cmd = cmd.trim();
    if cmd.is_empty() {
        return None;
    }
    match cmd.split_once(char::is_whitespace) {
        Some((program, args)) => {
            let args = args.trim();
            let args = (!args.is_empty()).then(|| args.to_string());
            Some((program.to_string(), args))
        }
        None => Some((cmd.to_string(), None)),
    }
}

fn read(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn valid_config() -> RenewConfig {
        let mut config: RenewConfig = serde_json::from_value(serde_json::json!({
            "ca": {
                "account_email": "ops@example.com",
                "name": "letsencrypt",
                "url": "https://acme-v02.api.letsencrypt.org/directory"
            },
            "west_username": "user",
            "west_password": "secret",
            "parallel_count": 4,
            "bt_db_path": "/www/server/panel/data/default.db",
            "bt_vhost_dir": "/www/server/panel/vhost/nginx",
            "nginx_restart_cmd": "nginx -s reload"
        }))
        .unwrap();
        config.nginx_conf_tpl = "server_name {domain};".to_string();
        config
    }

    #[test]
    fn test_defaults_applied() {
        let config = valid_config();
        assert_eq!(config.dispatch_delay_secs, 5);
        assert_eq!(config.dispatch_cap, 300);
        assert_eq!(config.effective_queue_capacity(), 50);
        assert_eq!(config.domains_path, PathBuf::from("domains"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_queue_capacity_never_below_minimum() {
        let mut config = valid_config();
        config.queue_capacity = 8;
        assert_eq!(config.effective_queue_capacity(), MIN_QUEUE_CAPACITY);
        config.queue_capacity = 120;
        assert_eq!(config.effective_queue_capacity(), 120);
    }

    #[test]
    fn test_validate_email() {
        let mut config = valid_config();
        config.ca.account_email.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingEmail)));

        config.ca.account_email = "not-an-email".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MalformedEmail(_))));
    }

    #[test]
    fn test_validate_ca_name_and_url() {
        let mut config = valid_config();
        config.ca.name = "buypass".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidCaName(_))));

        config.ca.name = "zerossl".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::CaUrlMismatch { .. })));

        config.ca.name.clear();
        assert!(matches!(config.validate(), Err(ConfigError::MissingCaName)));
    }

    #[test]
    fn test_validate_zerossl_requires_eab() {
        let mut config = valid_config();
        config.ca.name = "zerossl".to_string();
        config.ca.url = "https://acme.zerossl.com/v2/DV90".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingEab(_))));

        config.ca.eab_kid = "kid".to_string();
        config.ca.eab_hmac_key = "aGVsbG8".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_parallel_and_credentials() {
        let mut config = valid_config();
        config.parallel_count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidParallelCount)));

        let mut config = valid_config();
        config.west_password.clear();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRegistrarCredentials)
        ));
    }

    #[test]
    fn test_parse_domains_strips_cr_and_blanks() {
        let domains = parse_domains("example.com\r\n\r\n  example.org \r\nexample.net");
        assert_eq!(domains, vec!["example.com", "example.org", "example.net"]);
        assert!(parse_domains("\n\n").is_empty());
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("nginx -s reload"),
            Some(("nginx".to_string(), Some("-s reload".to_string())))
        );
        assert_eq!(
            split_command("/etc/init.d/nginx  reload"),
            Some(("/etc/init.d/nginx".to_string(), Some("reload".to_string())))
        );
        assert_eq!(split_command("reload-proxy"), Some(("reload-proxy".to_string(), None)));
        assert_eq!(split_command("   "), None);
    }

    #[test]
    fn test_load_reads_template() {
        let dir = tempdir().unwrap();
        let tpl = dir.path().join("nginx_conf.tpl");
        std::fs::write(&tpl, "ssl_certificate {crt};").unwrap();

        let config_path = dir.path().join("config.json");
        let json = serde_json::json!({
            "ca": { "account_email": "a@b.com", "name": "letsencrypt", "url": "letsencrypt" },
            "bt_db_path": "db",
            "bt_vhost_dir": "vhost",
            "template_path": tpl,
        });
        std::fs::write(&config_path, json.to_string()).unwrap();

        let config = RenewConfig::load(&config_path).unwrap();
        assert_eq!(config.nginx_conf_tpl, "ssl_certificate {crt};");
        assert_eq!(config.parallel_count, 10);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RenewConfig::load(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
