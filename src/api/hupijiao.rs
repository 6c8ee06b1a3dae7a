// src/api/hupijiao.rs
//
// Подпись запросов и колбэков платёжного шлюза (XunhuPay / 虎皮椒):
// параметры без `hash` и пустых значений сортируются по ключу,
// склеиваются в `k1=v1&k2=v2`, к строке дописывается секрет, затем MD5 (hex).

use md5::{Digest, Md5};
use std::collections::BTreeMap;
use subtle::ConstantTimeEq;

use crate::config::GatewayConfig;
use crate::error::AppError;
use crate::models::Order;

pub const HASH_FIELD: &str = "hash";

/// Статус успешной оплаты в колбэке шлюза.
pub const STATUS_PAID: &str = "OD";

/// Ответ, который шлюз ждёт на принятый колбэк.
pub const ACK_BODY: &str = "success";

pub type Params = BTreeMap<String, String>;

pub trait Signer: Send + Sync {
    fn sign(&self, params: &Params) -> String;

    fn verify(&self, params: &Params, digest: &str) -> bool {
        let expected = self.sign(params);
        expected.as_bytes().ct_eq(digest.as_bytes()).into()
    }
}

pub struct Md5Signer {
    secret: String,
}

impl Md5Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }
}

impl Signer for Md5Signer {
    fn sign(&self, params: &Params) -> String {
        let mut hasher = Md5::new();
        hasher.update(canonical_string(params).as_bytes());
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// `k1=v1&k2=v2` по возрастанию ключей, без `hash` и пустых значений.
pub fn canonical_string(params: &Params) -> String {
    params
        .iter()
        .filter(|(k, v)| k.as_str() != HASH_FIELD && !v.is_empty())
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub params: Params,
}

impl PaymentRequest {
    pub fn hash(&self) -> Option<&str> {
        self.params.get(HASH_FIELD).map(String::as_str)
    }
}

/// Собирает подписанный запрос на оплату. `time` и `nonce` передаются
/// снаружи, чтобы подпись была детерминированной.
pub fn build_payment_request(
    signer: &dyn Signer,
    gateway: &GatewayConfig,
    order: &Order,
    title: &str,
    time: i64,
    nonce: &str,
) -> PaymentRequest {
    let mut params = Params::new();
    params.insert("appid".into(), gateway.appid.clone());
    params.insert("title".into(), title.to_string());
    params.insert("trade_order_id".into(), order.order_number.clone());
    params.insert("total_fee".into(), order.amount.clone());
    params.insert("time".into(), time.to_string());
    params.insert("notify_url".into(), gateway.notify_url.clone());
    params.insert("return_url".into(), gateway.return_url.clone());
    params.insert("nonce_str".into(), nonce.to_string());

    let hash = signer.sign(&params);
    params.insert(HASH_FIELD.into(), hash);

    PaymentRequest { params }
}

/// Колбэк, прошедший проверку подписи.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCallback {
    pub trade_order_id: String,
    pub total_fee: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub open_order_id: Option<String>,
}

impl VerifiedCallback {
    pub fn is_paid(&self) -> bool {
        self.status == STATUS_PAID
    }

    /// Идентификатор транзакции шлюза для `mark_paid`.
    pub fn gateway_txn_id(&self) -> &str {
        self.transaction_id
            .as_deref()
            .or(self.open_order_id.as_deref())
            .unwrap_or(self.trade_order_id.as_str())
    }
}

pub fn parse_callback_body(body: &[u8]) -> Result<Params, AppError> {
    serde_urlencoded::from_bytes::<Params>(body)
        .map_err(|e| AppError::BadRequest(format!("invalid callback body: {e}")))
}

fn required<'a>(params: &'a Params, key: &'static str) -> Result<&'a str, AppError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("callback field {key} is missing")))
}

/// Любое отклонение считается отказом: нет обязательного поля, чужой appid
/// или подпись не совпала.
pub fn verify_callback(signer: &dyn Signer, appid: &str, params: &Params) -> Result<VerifiedCallback, AppError> {
    let hash = required(params, HASH_FIELD)?;
    let trade_order_id = required(params, "trade_order_id")?;
    let total_fee = required(params, "total_fee")?;
    let status = required(params, "status")?;

    if !signer.verify(params, hash) {
        return Err(AppError::SignatureInvalid);
    }

    if let Some(received) = params.get("appid").filter(|v| !v.is_empty()) {
        if received != appid {
            return Err(AppError::SignatureInvalid);
        }
    }

    Ok(VerifiedCallback {
        trade_order_id: trade_order_id.to_string(),
        total_fee: total_fee.to_string(),
        status: status.to_string(),
        transaction_id: params.get("transaction_id").filter(|v| !v.is_empty()).cloned(),
        open_order_id: params.get("open_order_id").filter(|v| !v.is_empty()).cloned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn signed_callback(signer: &Md5Signer) -> Params {
        let mut p = params(&[
            ("appid", "201906120001"),
            ("trade_order_id", "20250301120000ABCDEF12"),
            ("total_fee", "10.00"),
            ("transaction_id", "4200000001"),
            ("open_order_id", "9001"),
            ("order_title", "VPN Monthly"),
            ("status", "OD"),
            ("nonce_str", "1a2b3c4d"),
            ("time", "1740830400"),
            ("plugins", ""),
        ]);
        let hash = signer.sign(&p);
        p.insert(HASH_FIELD.into(), hash);
        p
    }

    #[test]
    fn canonical_string_sorts_and_skips_hash_and_empty() {
        let p = params(&[("b", "2"), ("a", "1"), ("hash", "zzz"), ("c", "")]);
        assert_eq!(canonical_string(&p), "a=1&b=2");
    }

    #[test]
    fn md5_signature_matches_reference_vector() {
        // md5("a=1&b=2secret")
        let signer = Md5Signer::new("secret");
        let p = params(&[("b", "2"), ("a", "1"), ("hash", "ignored")]);
        assert_eq!(signer.sign(&p), "8d9f51949e440aa629fd1a035708473a");
        assert!(signer.verify(&p, "8d9f51949e440aa629fd1a035708473a"));
        assert!(!signer.verify(&p, "8D9F51949E440AA629FD1A035708473A"));
    }

    #[test]
    fn valid_callback_is_accepted() {
        let signer = Md5Signer::new("s3cret");
        let p = signed_callback(&signer);
        let cb = verify_callback(&signer, "201906120001", &p).unwrap();
        assert_eq!(cb.trade_order_id, "20250301120000ABCDEF12");
        assert_eq!(cb.total_fee, "10.00");
        assert!(cb.is_paid());
        assert_eq!(cb.gateway_txn_id(), "4200000001");
    }

    #[test]
    fn any_single_mutated_field_is_rejected() {
        let signer = Md5Signer::new("s3cret");
        for (field, value) in [
            ("total_fee", "0.01"),
            ("trade_order_id", "20250301120000FFFFFFFF"),
            ("nonce_str", "deadbeef"),
            ("time", "1740830401"),
            ("status", "WP"),
        ] {
            let mut p = signed_callback(&signer);
            p.insert(field.into(), value.into());
            let err = verify_callback(&signer, "201906120001", &p).unwrap_err();
            assert!(matches!(err, AppError::SignatureInvalid), "{field} was not rejected");
        }
    }

    #[test]
    fn wrong_secret_or_missing_hash_is_rejected() {
        let p = signed_callback(&Md5Signer::new("other"));
        assert!(matches!(
            verify_callback(&Md5Signer::new("s3cret"), "201906120001", &p),
            Err(AppError::SignatureInvalid)
        ));

        let mut p = signed_callback(&Md5Signer::new("s3cret"));
        p.remove(HASH_FIELD);
        assert!(matches!(
            verify_callback(&Md5Signer::new("s3cret"), "201906120001", &p),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn foreign_appid_is_rejected() {
        let signer = Md5Signer::new("s3cret");
        let p = signed_callback(&signer);
        assert!(matches!(
            verify_callback(&signer, "another-app", &p),
            Err(AppError::SignatureInvalid)
        ));
    }

    #[test]
    fn payment_request_is_signed_over_all_fields() {
        use crate::models::{OrderStatus, PlanPeriod};
        use chrono::Utc;

        let gateway = GatewayConfig {
            api_url: "https://api.xunhupay.com/payment/do.html".into(),
            appid: "201906120001".into(),
            app_secret: "s3cret".into(),
            notify_url: "https://shop.example.com/payment/notify".into(),
            return_url: "https://shop.example.com/orders".into(),
        };
        let now = Utc::now();
        let order = Order {
            id: 1,
            order_number: "20250301120000ABCDEF12".into(),
            user_id: 1,
            plan_id: 6,
            amount: "10.00".into(),
            period: PlanPeriod::OneMonth,
            traffic_gb: 200,
            status: OrderStatus::Pending,
            gateway_order_id: None,
            transaction_id: None,
            subscription_id: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
            cancelled_at: None,
            completed_at: None,
        };
        let signer = Md5Signer::new("s3cret");
        let req = build_payment_request(&signer, &gateway, &order, "Monthly 200G", 1740830400, "abcd1234");

        let keys: Vec<&str> = req.params.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            [
                "appid",
                "hash",
                "nonce_str",
                "notify_url",
                "return_url",
                "time",
                "title",
                "total_fee",
                "trade_order_id"
            ]
        );
        assert_eq!(req.params["total_fee"], "10.00");
        assert!(signer.verify(&req.params, req.hash().unwrap()));

        let again = build_payment_request(&signer, &gateway, &order, "Monthly 200G", 1740830400, "abcd1234");
        assert_eq!(again.hash(), req.hash());
    }

    #[test]
    fn form_body_is_parsed() {
        let p = parse_callback_body(b"trade_order_id=abc&status=OD&total_fee=10.00").unwrap();
        assert_eq!(p.get("trade_order_id").map(String::as_str), Some("abc"));
        assert_eq!(p.get("status").map(String::as_str), Some("OD"));
    }
}
