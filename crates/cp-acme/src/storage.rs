use crate::types::{
    CertificateMetadata, CertificateResource, CertificateSummary, StoreError, StoreResult,
};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use x509_parser::pem::Pem;
use x509_parser::prelude::*;

pub const EXT_CERT: &str = "crt";
pub const EXT_KEY: &str = "key";
pub const EXT_ISSUER: &str = "issuer.crt";
pub const EXT_META: &str = "json";

/// On-disk certificate store: one `<domain>.<ext>` file set per domain.
pub struct CertificateStore {
    base_path: PathBuf,
}

impl CertificateStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Initialize storage directory
    pub fn init(&self) -> StoreResult<()> {
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// File name for a domain, wildcards replaced by `_`
    pub fn file_name(domain: &str, ext: &str) -> String {
        format!("{}.{}", domain.replace('*', "_"), ext)
    }

    pub fn path_for(&self, domain: &str, ext: &str) -> PathBuf {
        self.base_path.join(Self::file_name(domain, ext))
    }

    /// Absolute path for a domain file, as written into proxy configs
    pub fn absolute_path_for(&self, domain: &str, ext: &str) -> StoreResult<PathBuf> {
        Ok(std::path::absolute(self.path_for(domain, ext))?)
    }

    /// Parse every certificate in `<domain>.crt`, leaf first.
    pub fn read_certificate(&self, domain: &str) -> StoreResult<Vec<CertificateSummary>> {
        let path = self.path_for(domain, EXT_CERT);
        if !path.exists() {
            return Err(StoreError::NotFound(domain.to_string()));
        }
        let content = fs::read(&path)?;
        parse_certificates(&content)
    }

    /// Read the PEM private key for a domain
    pub fn read_key(&self, domain: &str) -> StoreResult<String> {
        let path = self.path_for(domain, EXT_KEY);
        if !path.exists() {
            return Err(StoreError::NotFound(domain.to_string()));
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Persist certificate, key, issuer chain and metadata for a resource
    pub fn save_resource(&self, resource: &CertificateResource) -> StoreResult<()> {
        self.init()?;
        let domain = &resource.domain;

        self.write_atomic(&self.path_for(domain, EXT_CERT), &resource.certificate)?;
        self.write_atomic(&self.path_for(domain, EXT_KEY), &resource.private_key)?;
        if !resource.issuer_certificate.is_empty() {
            self.write_atomic(&self.path_for(domain, EXT_ISSUER), &resource.issuer_certificate)?;
        }

        let not_after = parse_certificates(resource.certificate.as_bytes())
            .ok()
            .and_then(|certs| certs.first().map(|c| c.not_after));
        let metadata = CertificateMetadata {
            domain: domain.clone(),
            domains: resource.domains.clone(),
            not_after,
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&metadata)?;
        self.write_atomic(&self.path_for(domain, EXT_META), &json)?;

        debug!(domain = %domain, path = %self.base_path.display(), "Certificate resource saved");
        Ok(())
    }

    /// Write to a temporary file first, then rename over the target
    fn write_atomic(&self, path: &Path, content: &str) -> StoreResult<()> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Parse all `CERTIFICATE` PEM blocks in a buffer.
pub fn parse_certificates(pem_bytes: &[u8]) -> StoreResult<Vec<CertificateSummary>> {
    let mut certs = Vec::new();
    for pem in Pem::iter_from_buffer(pem_bytes) {
        let pem = pem.map_err(|e| StoreError::CertificateParse(format!("Failed to parse PEM: {}", e)))?;
        if pem.label != "CERTIFICATE" {
            continue;
        }
        let (_, cert) = X509Certificate::from_der(&pem.contents)
            .map_err(|e| StoreError::CertificateParse(format!("Failed to parse certificate: {}", e)))?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| StoreError::CertificateParse("Invalid expiry timestamp".to_string()))?;
        certs.push(CertificateSummary { not_after });
    }

    if certs.is_empty() {
        return Err(StoreError::CertificateParse("No certificate found in PEM data".to_string()));
    }
    Ok(certs)
}

/// ACME account credentials, stored per CA and e-mail:
/// `<accounts_dir>/<ca name>/<email>/account.json`
pub struct AccountStorage {
    dir: PathBuf,
}

impl AccountStorage {
    pub fn new<P: AsRef<Path>>(accounts_dir: P, ca_name: &str, email: &str) -> Self {
        Self {
            dir: accounts_dir.as_ref().join(ca_name).join(email),
        }
    }

    pub fn account_path(&self) -> PathBuf {
        self.dir.join("account.json")
    }

    pub fn is_initialized(&self) -> bool {
        self.account_path().exists()
    }

    pub fn load(&self) -> StoreResult<String> {
        Ok(fs::read_to_string(self.account_path())?)
    }

    pub fn save(&self, credentials_json: &str) -> StoreResult<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.account_path(), credentials_json)?;
        Ok(())
    }
}
