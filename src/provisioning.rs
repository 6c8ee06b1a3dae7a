// src/provisioning.rs
//
// Выдача и продление VPN-подписки после оплаты заказа.

use chrono::{DateTime, Utc};
use qrcode::render::svg;
use qrcode::QrCode;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::xui_client::{PanelClient, XuiClient};
use crate::db::{self, SUBSCRIPTION_COLUMNS};
use crate::error::AppError;
use crate::models::{Order, PlanPeriod, Subscription};

/// Условия тарифа, зафиксированные в заказе.
#[derive(Debug, Clone, Copy)]
pub struct PlanTerms {
    pub plan_id: i32,
    pub period: PlanPeriod,
    pub traffic_gb: i32,
}

impl From<&Order> for PlanTerms {
    fn from(order: &Order) -> Self {
        Self {
            plan_id: order.plan_id,
            period: order.period,
            traffic_gb: order.traffic_gb,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renewal {
    /// Новая подписка или перезапуск: другой тариф, либо срок старой вышел или она отключена.
    Start { expires_at: Option<DateTime<Utc>> },
    /// Продление подписки на тот же тариф, срок которой ещё не вышел.
    /// Исчерпанный трафик продлению не мешает: квота просто добавляется.
    Extend { expires_at: Option<DateTime<Utc>> },
}

impl Renewal {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Renewal::Start { expires_at } | Renewal::Extend { expires_at } => *expires_at,
        }
    }
}

/// Новый срок при продлении: период прибавляется к более позднему из
/// текущего срока и `now`, никогда к моменту в прошлом.
pub fn extended_expiry(
    current: Option<DateTime<Utc>>,
    period: PlanPeriod,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let Some(duration) = period.duration() else {
        return current;
    };
    let base = match current {
        Some(expires_at) if expires_at > now => expires_at,
        _ => now,
    };
    Some(base + duration)
}

pub fn plan_renewal(existing: Option<&Subscription>, terms: &PlanTerms, now: DateTime<Utc>) -> Renewal {
    match existing {
        Some(sub) if sub.plan_id == terms.plan_id && sub.is_within_term(now) => Renewal::Extend {
            expires_at: extended_expiry(sub.expires_at, terms.period, now),
        },
        _ => Renewal::Start {
            expires_at: terms.period.duration().map(|d| now + d),
        },
    }
}

/// 64 hex-символа.
pub fn new_access_token() -> String {
    format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

pub fn panel_email(user_id: i32) -> String {
    format!("user_{user_id}")
}

#[derive(Debug, Clone)]
pub struct Provisioned {
    pub subscription: Subscription,
    pub renewal: Renewal,
}

/// Создаёт или продлевает подписку пользователя. Вызывается только внутри
/// транзакции, переводящей заказ в `paid`.
pub async fn activate_or_extend(
    conn: &mut PgConnection,
    user_id: i32,
    order_id: i32,
    terms: &PlanTerms,
    now: DateTime<Utc>,
) -> Result<Provisioned, AppError> {
    // сериализуем оплаты одного пользователя
    sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("user"))?;

    let existing = db::get_user_subscription(&mut *conn, user_id).await?;
    let renewal = plan_renewal(existing.as_ref(), terms, now);

    let row = match (&existing, renewal) {
        (Some(sub), Renewal::Extend { expires_at }) => {
            sqlx::query(&format!(
                r#"UPDATE subscriptions
                   SET order_id = $1,
                       expires_at = $2,
                       traffic_total_gb = traffic_total_gb + $3,
                       updated_at = $4
                   WHERE id = $5
                   RETURNING {SUBSCRIPTION_COLUMNS}"#
            ))
            .bind(order_id)
            .bind(expires_at)
            .bind(terms.traffic_gb)
            .bind(now)
            .bind(sub.id)
            .fetch_one(&mut *conn)
            .await?
        }
        (Some(sub), Renewal::Start { expires_at }) => {
            sqlx::query(&format!(
                r#"UPDATE subscriptions
                   SET plan_id = $1,
                       order_id = $2,
                       traffic_total_gb = $3,
                       traffic_used_bytes = 0,
                       activated_at = $4,
                       expires_at = $5,
                       is_active = true,
                       updated_at = $4
                   WHERE id = $6
                   RETURNING {SUBSCRIPTION_COLUMNS}"#
            ))
            .bind(terms.plan_id)
            .bind(order_id)
            .bind(terms.traffic_gb)
            .bind(now)
            .bind(expires_at)
            .bind(sub.id)
            .fetch_one(&mut *conn)
            .await?
        }
        (None, renewal) => {
            sqlx::query(&format!(
                r#"INSERT INTO subscriptions
                       (user_id, plan_id, order_id, token, panel_email, traffic_total_gb,
                        traffic_used_bytes, activated_at, expires_at, is_active, created_at, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, 0, $7, $8, true, $7, $7)
                   RETURNING {SUBSCRIPTION_COLUMNS}"#
            ))
            .bind(user_id)
            .bind(terms.plan_id)
            .bind(order_id)
            .bind(new_access_token())
            .bind(panel_email(user_id))
            .bind(terms.traffic_gb)
            .bind(now)
            .bind(renewal.expires_at())
            .fetch_one(&mut *conn)
            .await?
        }
    };

    let subscription = db::subscription_from_row(&row)?;
    log::info!(
        "subscription provisioned user_id={} subscription_id={} order_id={} renewal={:?}",
        user_id,
        subscription.id,
        order_id,
        renewal
    );

    Ok(Provisioned { subscription, renewal })
}

/// Синхронизирует клиента в панели 3x-ui с подпиской владельца оплаченного
/// заказа. Возвращает UUID клиента в панели.
///
/// Подписка перечитывается из БД: между коммитом оплаты и этим вызовом её мог
/// продлить другой заказ, в панель уходит последнее состояние. Повторный вызов
/// безопасен: при известном `panel_uuid` клиент обновляется, а не создаётся.
pub async fn sync_panel(pool: &PgPool, panel: &XuiClient, order: &Order) -> Result<String, AppError> {
    let sub = db::get_user_subscription(pool, order.user_id)
        .await?
        .ok_or(AppError::NotFound("subscription"))?;

    let client = PanelClient {
        uuid: sub
            .panel_uuid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        email: sub.panel_email.clone(),
        total_bytes: sub.traffic_total_bytes(),
        expiry_time_ms: sub.expires_at.map(|t| t.timestamp_millis()).unwrap_or(0),
    };

    match sub.panel_uuid {
        Some(_) => {
            panel.update_client(&client).await?;
            if restarted_by(&sub, order) {
                panel.reset_client_traffic(&client.email).await?;
            }
        }
        None => {
            panel.add_client(&client).await?;
            db::set_subscription_panel_uuid(pool, sub.id, &client.uuid).await?;
        }
    }

    Ok(client.uuid)
}

/// Подписку (пере)запустил именно этот заказ: activated_at совпадает с paid_at.
fn restarted_by(sub: &Subscription, order: &Order) -> bool {
    sub.order_id == order.id && order.paid_at == Some(sub.activated_at)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AccessLink {
    pub subscription_url: String,
    pub token: String,
    /// SVG с QR-кодом ссылки подписки
    pub qr_svg: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_live: bool,
}

pub fn subscription_url(base_url: &str, path: &str, token: &str) -> String {
    let path = path.trim_matches('/');
    if path.is_empty() {
        format!("{}/{}", base_url.trim_end_matches('/'), token)
    } else {
        format!("{}/{}/{}", base_url.trim_end_matches('/'), path, token)
    }
}

pub fn render_qr_svg(data: &str) -> Result<String, AppError> {
    let code = QrCode::new(data.as_bytes()).map_err(|e| AppError::Internal(format!("qr encode: {e}")))?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(200, 200)
        .build())
}

pub async fn get_access_link(
    pool: &PgPool,
    base_url: &str,
    path: &str,
    user_id: i32,
) -> Result<AccessLink, AppError> {
    let sub = db::get_user_subscription(pool, user_id)
        .await?
        .ok_or(AppError::NotFound("subscription"))?;

    let url = subscription_url(base_url, path, &sub.token);
    let qr_svg = render_qr_svg(&url)?;

    Ok(AccessLink {
        subscription_url: url,
        is_live: sub.is_live(Utc::now()),
        expires_at: sub.expires_at,
        token: sub.token,
        qr_svg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn subscription(plan_id: i32, expires_at: Option<DateTime<Utc>>) -> Subscription {
        Subscription {
            id: 7,
            user_id: 3,
            plan_id,
            order_id: 1,
            token: "a".repeat(64),
            panel_email: panel_email(3),
            panel_uuid: None,
            traffic_total_gb: 200,
            traffic_used_bytes: 0,
            activated_at: now() - Duration::days(10),
            expires_at,
            is_active: true,
            created_at: now() - Duration::days(10),
            updated_at: now() - Duration::days(10),
        }
    }

    fn monthly(plan_id: i32) -> PlanTerms {
        PlanTerms {
            plan_id,
            period: PlanPeriod::OneMonth,
            traffic_gb: 200,
        }
    }

    #[test]
    fn active_subscription_extends_from_current_expiry() {
        let old = now() + Duration::days(12);
        let sub = subscription(1, Some(old));
        let renewal = plan_renewal(Some(&sub), &monthly(1), now());
        assert_eq!(
            renewal,
            Renewal::Extend {
                expires_at: Some(old + Duration::days(30))
            }
        );
    }

    #[test]
    fn expired_subscription_restarts_from_now() {
        let sub = subscription(1, Some(now() - Duration::days(3)));
        let renewal = plan_renewal(Some(&sub), &monthly(1), now());
        assert_eq!(
            renewal,
            Renewal::Start {
                expires_at: Some(now() + Duration::days(30))
            }
        );
    }

    #[test]
    fn exhausted_traffic_keeps_remaining_days() {
        let old = now() + Duration::days(20);
        let mut sub = subscription(1, Some(old));
        sub.traffic_used_bytes = sub.traffic_total_bytes();
        assert!(!sub.is_live(now()));

        assert_eq!(
            plan_renewal(Some(&sub), &monthly(1), now()),
            Renewal::Extend {
                expires_at: Some(old + Duration::days(30))
            }
        );
    }

    #[test]
    fn disabled_subscription_restarts_from_now() {
        let mut sub = subscription(1, Some(now() + Duration::days(20)));
        sub.is_active = false;
        assert_eq!(
            plan_renewal(Some(&sub), &monthly(1), now()),
            Renewal::Start {
                expires_at: Some(now() + Duration::days(30))
            }
        );
    }

    #[test]
    fn extension_never_starts_in_the_past() {
        let past = now() - Duration::days(40);
        assert_eq!(
            extended_expiry(Some(past), PlanPeriod::ThreeMonths, now()),
            Some(now() + Duration::days(90))
        );
    }

    #[test]
    fn first_purchase_and_plan_change_start_fresh() {
        assert_eq!(
            plan_renewal(None, &monthly(1), now()),
            Renewal::Start {
                expires_at: Some(now() + Duration::days(30))
            }
        );

        let sub = subscription(1, Some(now() + Duration::days(5)));
        assert!(matches!(
            plan_renewal(Some(&sub), &monthly(2), now()),
            Renewal::Start { .. }
        ));
    }

    #[test]
    fn one_time_plans_have_no_expiry() {
        let terms = PlanTerms {
            plan_id: 4,
            period: PlanPeriod::OneTime,
            traffic_gb: 130,
        };
        assert_eq!(
            plan_renewal(None, &terms, now()),
            Renewal::Start { expires_at: None }
        );

        let sub = subscription(4, None);
        assert_eq!(
            plan_renewal(Some(&sub), &terms, now()),
            Renewal::Extend { expires_at: None }
        );
    }

    fn paid_order(id: i32, paid_at: DateTime<Utc>) -> Order {
        Order {
            id,
            order_number: format!("20250301120000ABCD{id:04}"),
            user_id: 3,
            plan_id: 1,
            amount: "10.00".into(),
            period: PlanPeriod::OneMonth,
            traffic_gb: 200,
            status: crate::models::OrderStatus::Paid,
            gateway_order_id: None,
            transaction_id: Some("4200001234".into()),
            subscription_id: Some(7),
            created_at: paid_at,
            updated_at: paid_at,
            paid_at: Some(paid_at),
            cancelled_at: None,
            completed_at: None,
        }
    }

    #[test]
    fn traffic_reset_only_for_the_restarting_order() {
        let mut sub = subscription(1, Some(now() + Duration::days(30)));
        sub.order_id = 5;
        sub.activated_at = now();

        assert!(restarted_by(&sub, &paid_order(5, now())));
        // продление тем же заказом не сбрасывает activated_at
        assert!(!restarted_by(&sub, &paid_order(5, now() + Duration::days(1))));
        // подписку уже перехватил более новый заказ
        assert!(!restarted_by(&sub, &paid_order(4, now())));
    }

    #[test]
    fn access_token_is_64_hex_chars() {
        let token = new_access_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, new_access_token());
    }

    #[test]
    fn subscription_url_joins_parts() {
        assert_eq!(
            subscription_url("https://vpn.example.com/", "/sub", "abc"),
            "https://vpn.example.com/sub/abc"
        );
        assert_eq!(
            subscription_url("https://vpn.example.com", "", "abc"),
            "https://vpn.example.com/abc"
        );
    }

    #[test]
    fn qr_svg_is_rendered() {
        let svg = render_qr_svg("https://vpn.example.com/sub/abc").unwrap();
        assert!(svg.contains("<svg"));
    }
}
