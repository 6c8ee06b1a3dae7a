pub mod api;
pub mod config;
pub mod dashboard;
pub mod db;
pub mod docs;
pub mod error;
pub mod ledger;
pub mod models;
pub mod provisioning;

use sqlx::PgPool;
use std::sync::Arc;

use crate::api::hupijiao::{Md5Signer, Signer};
use crate::api::xui_client::{PanelError, XuiClient};
use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Общий клиент для шлюза оплаты, с таймаутом из конфига.
    pub http: reqwest::Client,
    pub signer: Arc<dyn Signer>,
    /// `None`, если панель 3x-ui не настроена.
    pub panel: Option<XuiClient>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
        let signer: Arc<dyn Signer> = Arc::new(Md5Signer::new(config.gateway.app_secret.clone()));
        let panel = config
            .panel
            .clone()
            .map(|panel| XuiClient::new(panel, config.http_timeout))
            .transpose()?;

        Ok(Self {
            pool,
            config,
            http,
            signer,
            panel,
        })
    }
}
