// src/api/xui_client.rs
//
// Клиент API панели 3x-ui. Сессия держится в cookie `3x-ui`:
// `/login` принимает форму, остальные вызовы идут в `{panel_path}/api/inbounds/...`.

use serde::Deserialize;
use serde_json::json;
use std::fmt;
use std::time::Duration;

use crate::config::PanelConfig;

#[derive(Debug)]
pub enum PanelError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Rejected { action: &'static str, msg: String },
    InvalidResponse(String),
}

impl PanelError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PanelError::Http(e) if e.is_timeout())
    }
}

impl fmt::Display for PanelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelError::Http(e) => write!(f, "http error: {e}"),
            PanelError::Api { status, body } => write!(f, "panel api error status={status} body={body}"),
            PanelError::Rejected { action, msg } => write!(f, "panel rejected {action}: {msg}"),
            PanelError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl std::error::Error for PanelError {}

impl From<reqwest::Error> for PanelError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

/// Клиент панели, соответствующий одной подписке.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelClient {
    pub uuid: String,
    pub email: String,
    pub total_bytes: i64,
    /// 0 = без срока
    pub expiry_time_ms: i64,
}

#[derive(Debug, Deserialize)]
struct PanelResponse {
    success: bool,
    #[serde(default)]
    msg: String,
}

#[derive(Clone)]
pub struct XuiClient {
    http: reqwest::Client,
    config: PanelConfig,
}

impl XuiClient {
    pub fn new(config: PanelConfig, timeout: Duration) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}{}/api/inbounds{}", self.config.base_url, self.config.panel_path, endpoint)
    }

    /// Тело addClient/updateClient: `settings` передаётся строкой с JSON внутри.
    pub fn client_payload(&self, client: &PanelClient) -> serde_json::Value {
        let settings = json!({
            "clients": [{
                "id": client.uuid,
                "email": client.email,
                "flow": "",
                "limitIp": self.config.limit_ip,
                "totalGB": client.total_bytes,
                "expiryTime": client.expiry_time_ms,
                "enable": true,
                "tgId": "",
                "subId": "",
            }]
        });

        json!({
            "id": self.config.inbound_id,
            "settings": settings.to_string(),
        })
    }

    pub async fn login(&self) -> Result<(), PanelError> {
        let resp = self
            .http
            .post(format!("{}/login", self.config.base_url))
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.config.password.as_str()),
            ])
            .send()
            .await?;

        check_response(resp, "login").await
    }

    pub async fn add_client(&self, client: &PanelClient) -> Result<(), PanelError> {
        self.login().await?;
        let resp = self
            .http
            .post(self.api_url("/addClient"))
            .json(&self.client_payload(client))
            .send()
            .await?;

        check_response(resp, "addClient").await?;
        log::info!("panel client added email={} uuid={}", client.email, client.uuid);
        Ok(())
    }

    pub async fn update_client(&self, client: &PanelClient) -> Result<(), PanelError> {
        self.login().await?;
        let resp = self
            .http
            .post(self.api_url(&format!("/updateClient/{}", client.uuid)))
            .json(&self.client_payload(client))
            .send()
            .await?;

        check_response(resp, "updateClient").await?;
        log::info!("panel client updated email={} uuid={}", client.email, client.uuid);
        Ok(())
    }

    pub async fn reset_client_traffic(&self, email: &str) -> Result<(), PanelError> {
        self.login().await?;
        let resp = self
            .http
            .post(self.api_url(&format!(
                "/{}/resetClientTraffic/{}",
                self.config.inbound_id, email
            )))
            .send()
            .await?;

        check_response(resp, "resetClientTraffic").await
    }
}

async fn check_response(resp: reqwest::Response, action: &'static str) -> Result<(), PanelError> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(PanelError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let parsed = serde_json::from_str::<PanelResponse>(&body)
        .map_err(|e| PanelError::InvalidResponse(format!("{e}; body={body}")))?;

    if !parsed.success {
        return Err(PanelError::Rejected { action, msg: parsed.msg });
    }
    Ok(())
}
