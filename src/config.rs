// src/config.rs
//
// Все ключи и секреты читаются из окружения один раз при старте.

use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub api_url: String,
    pub appid: String,
    pub app_secret: String,
    pub notify_url: String,
    pub return_url: String,
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub base_url: String,
    pub panel_path: String,
    pub username: String,
    pub password: String,
    pub inbound_id: i32,
    pub limit_ip: i32,
}

/// Узел VPN, который попадает в выдачу `/sub/{token}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VpnNode {
    pub name: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub jwt_expire_days: i64,
    pub http_timeout: Duration,
    pub subscription_base_url: String,
    pub subscription_path: String,
    pub nodes: Vec<VpnNode>,
    /// Параметр `security` в vless-ссылках
    pub node_security: String,
    pub gateway: GatewayConfig,
    /// Панель 3x-ui опциональна: без неё заказы остаются в статусе `paid`.
    pub panel: Option<PanelConfig>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let gateway = GatewayConfig {
            api_url: optional("PAY_API_URL")
                .unwrap_or_else(|| "https://api.xunhupay.com/payment/do.html".to_string()),
            appid: required("PAY_APPID")?,
            app_secret: required("PAY_APPSECRET")?,
            notify_url: required("PAY_NOTIFY_URL")?,
            return_url: required("PAY_RETURN_URL")?,
        };

        let panel = match optional("XUI_BASE_URL") {
            Some(base_url) => Some(PanelConfig {
                base_url: base_url.trim_end_matches('/').to_string(),
                panel_path: optional("XUI_PANEL_PATH").unwrap_or_else(|| "/panel".to_string()),
                username: required("XUI_USERNAME")?,
                password: required("XUI_PASSWORD")?,
                inbound_id: parsed("XUI_INBOUND_ID", 1)?,
                limit_ip: parsed("XUI_LIMIT_IP", 3)?,
            }),
            None => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            jwt_secret: required("JWT_SECRET")?,
            jwt_expire_days: parsed("JWT_EXPIRE_DAYS", 7)?,
            http_timeout: Duration::from_secs(parsed("HTTP_TIMEOUT_SECS", 10)?),
            subscription_base_url: required("SUBSCRIPTION_BASE_URL")?
                .trim_end_matches('/')
                .to_string(),
            subscription_path: optional("SUBSCRIPTION_PATH").unwrap_or_else(|| "/sub".to_string()),
            nodes: match optional("VPN_NODES") {
                Some(value) => parse_nodes(&value).ok_or(ConfigError::Invalid { key: "VPN_NODES", value })?,
                None => Vec::new(),
            },
            node_security: optional("VPN_NODE_SECURITY").unwrap_or_else(|| "none".to_string()),
            gateway,
            panel,
        })
    }
}

/// `name=host:port,name=host:port`
pub fn parse_nodes(value: &str) -> Option<Vec<VpnNode>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, addr) = entry.split_once('=')?;
            let (host, port) = addr.trim().rsplit_once(':')?;
            let (name, host) = (name.trim(), host.trim());
            if name.is_empty() || host.is_empty() {
                return None;
            }
            Some(VpnNode {
                name: name.to_string(),
                host: host.to_string(),
                port: port.trim().parse().ok()?,
            })
        })
        .collect()
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    optional(key).ok_or(ConfigError::Missing(key))
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(key) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
