// src/api/hupijiao_client.rs
//
// Клиент API оплаты XunhuPay (https://api.xunhupay.com/payment/do.html).
// Запрос уходит формой, ответ приходит JSON с errcode/errmsg.

use serde::Deserialize;
use serde_json::Value;
use std::fmt;

use crate::api::hupijiao::PaymentRequest;

#[derive(Debug)]
pub enum GatewayError {
    Http(reqwest::Error),
    Api { status: u16, body: String },
    Rejected { errcode: i64, errmsg: String },
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Http(e) if e.is_timeout())
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Http(e) => write!(f, "http error: {e}"),
            GatewayError::Api { status, body } => {
                write!(f, "gateway api error status={status} body={body}")
            }
            GatewayError::Rejected { errcode, errmsg } => {
                write!(f, "gateway rejected request errcode={errcode} errmsg={errmsg}")
            }
            GatewayError::InvalidResponse(e) => write!(f, "invalid response: {e}"),
        }
    }
}

impl std::error::Error for GatewayError {}

impl From<reqwest::Error> for GatewayError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(value)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResponse {
    /// Номер заказа на стороне шлюза; приходит то числом, то строкой.
    #[serde(default)]
    pub openid: Option<Value>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_qrcode: Option<String>,
    pub errcode: i64,
    #[serde(default)]
    pub errmsg: String,
}

impl PaymentResponse {
    pub fn gateway_order_id(&self) -> Option<String> {
        match self.openid.as_ref()? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

pub async fn create_payment(
    http: &reqwest::Client,
    api_url: &str,
    req: &PaymentRequest,
) -> Result<PaymentResponse, GatewayError> {
    let resp = http.post(api_url).form(&req.params).send().await?;

    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let parsed = serde_json::from_str::<PaymentResponse>(&body)
        .map_err(|e| GatewayError::InvalidResponse(format!("{e}; body={body}")))?;

    if parsed.errcode != 0 {
        return Err(GatewayError::Rejected {
            errcode: parsed.errcode,
            errmsg: parsed.errmsg,
        });
    }

    if parsed.url.is_none() && parsed.url_qrcode.is_none() {
        return Err(GatewayError::InvalidResponse(format!("no payment url; body={body}")));
    }

    Ok(parsed)
}
