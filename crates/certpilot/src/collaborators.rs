use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cp_acme::{AccountStorage, AcmeClient};
use cp_common::RenewConfig;
use cp_dns::SoaZoneResolver;
use cp_panel::PanelRegistry;
use cp_renew::{CollaboratorFactory, Collaborators, CommandReloader, Reloader};
use cp_west::{WestClient, WestDnsProvider};
use tracing::info;

const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// Wires the real registrar, ACME, panel and reload implementations
pub struct LiveCollaborators;

#[async_trait]
impl CollaboratorFactory for LiveCollaborators {
    async fn build(&self, config: &RenewConfig) -> Result<Collaborators> {
        let api = WestClient::new(
            &config.west_api_base,
            &config.west_username,
            &config.west_password,
        )
        .context("registrar client")?;
        let zones = SoaZoneResolver::from_nameservers(&config.nameservers, DNS_TIMEOUT);
        let provider = WestDnsProvider::new(
            api,
            Arc::new(zones),
            Some(config.west_duplicate_errcode),
        );

        let accounts = AccountStorage::new(
            &config.accounts_dir,
            &config.ca.name,
            &config.ca.account_email,
        );
        let ca = AcmeClient::connect(&config.ca, &accounts, Arc::new(provider))
            .await
            .with_context(|| format!("ACME account for {} on {}", config.ca.account_email, config.ca.name))?;

        let registry = PanelRegistry::open(&config.bt_db_path, &config.site_root)
            .with_context(|| format!("panel database {}", config.bt_db_path.display()))?;

        let reloader = CommandReloader::from_command(&config.nginx_restart_cmd)
            .map(|r| Arc::new(r) as Arc<dyn Reloader>);
        if reloader.is_none() {
            info!("nginx_restart_cmd is empty, proxy will not be reloaded");
        }

        Ok(Collaborators {
            ca: Arc::new(ca),
            registry: Arc::new(registry),
            reloader,
        })
    }
}
