// src/api/feed.rs
//
// Публичная выдача конфигурации по ссылке подписки: GET {SUBSCRIPTION_PATH}/{token}.
// Клиент VPN получает список vless-ссылок, по одной на узел.

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use reqwest::Url;

use crate::config::VpnNode;
use crate::error::AppError;
use crate::models::Subscription;
use crate::{db, AppState};

/// Регистрирует выдачу по пути из `SUBSCRIPTION_PATH`. Подключать после
/// `api::configure`, чтобы пустой путь не перекрыл остальные роуты.
pub fn configure(path: &str) -> impl FnOnce(&mut web::ServiceConfig) {
    let route = match path.trim_matches('/') {
        "" => "/{token}".to_string(),
        prefix => format!("/{prefix}/{{token}}"),
    };
    move |cfg: &mut web::ServiceConfig| {
        cfg.route(&route, web::get().to(subscription_feed));
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum FeedRejection {
    Disabled,
    Expired,
    NotProvisioned,
}

impl FeedRejection {
    fn status(&self) -> StatusCode {
        match self {
            FeedRejection::Disabled | FeedRejection::Expired => StatusCode::FORBIDDEN,
            FeedRejection::NotProvisioned => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn message(&self) -> &'static str {
        match self {
            FeedRejection::Disabled => "Subscription disabled",
            FeedRejection::Expired => "Subscription expired",
            FeedRejection::NotProvisioned => "Subscription is not provisioned yet",
        }
    }
}

/// UUID клиента панели, если подписка сейчас даёт доступ.
pub fn feed_uuid(sub: &Subscription, now: DateTime<Utc>) -> Result<&str, FeedRejection> {
    if !sub.is_active {
        return Err(FeedRejection::Disabled);
    }
    if !sub.is_live(now) {
        return Err(FeedRejection::Expired);
    }
    sub.panel_uuid.as_deref().ok_or(FeedRejection::NotProvisioned)
}

pub fn vless_url(uuid: &str, node: &VpnNode, security: &str, remark: &str) -> Result<String, AppError> {
    let mut url = Url::parse(&format!("vless://{uuid}@{}:{}", node.host, node.port))
        .map_err(|e| AppError::Internal(format!("vless url for node {}: {e}", node.name)))?;
    url.query_pairs_mut()
        .append_pair("type", "tcp")
        .append_pair("encryption", "none")
        .append_pair("security", security);
    url.set_fragment(Some(remark));
    Ok(url.to_string())
}

/// Заголовок `subscription-userinfo`, который читают клиенты (Clash, v2rayN).
pub fn user_info_header(sub: &Subscription) -> String {
    format!(
        "upload=0; download={}; total={}; expire={}",
        sub.traffic_used_bytes,
        sub.traffic_total_bytes(),
        sub.expires_at.map(|t| t.timestamp()).unwrap_or(0)
    )
}

#[utoipa::path(
    get,
    path = "/sub/{token}",
    tag = "subscriptions",
    params(("token" = String, Path, description = "Access token from the subscription link")),
    responses(
        (status = 200, description = "vless URIs, one per node", content_type = "text/plain", body = String),
        (status = 403, description = "Subscription expired, out of traffic or disabled"),
        (status = 404, description = "Unknown token"),
        (status = 503, description = "Subscription is not synced to the VPN panel yet")
    )
)]
pub async fn subscription_feed(
    state: web::Data<AppState>,
    token: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let Some(sub) = db::get_subscription_by_token(&state.pool, &token).await? else {
        return Ok(HttpResponse::NotFound()
            .content_type("text/plain")
            .body("Subscription not found"));
    };

    let uuid = match feed_uuid(&sub, Utc::now()) {
        Ok(uuid) => uuid,
        Err(rejection) => {
            log::info!("subscription feed refused subscription_id={}: {:?}", sub.id, rejection);
            return Ok(HttpResponse::build(rejection.status())
                .content_type("text/plain")
                .body(rejection.message()));
        }
    };

    let links = state
        .config
        .nodes
        .iter()
        .map(|node| {
            let remark = format!("{}-{}", node.name, sub.panel_email);
            vless_url(uuid, node, &state.config.node_security, &remark)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .insert_header(("subscription-userinfo", user_info_header(&sub)))
        .body(links.join("\n")))
}
