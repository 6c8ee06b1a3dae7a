// src/api/webhooks_hupijiao.rs
//
// Колбэк шлюза оплаты: POST /payment/notify, тело application/x-www-form-urlencoded.
// Подпись, номер заказа и сумма проверяются до любых изменений в БД.

use actix_web::{post, web, HttpResponse, ResponseError};

use crate::api::hupijiao::{self, ACK_BODY};
use crate::error::AppError;
use crate::ledger;
use crate::models::{parse_cents, Order, OrderStatus};
use crate::{db, provisioning, AppState};

const FAIL_BODY: &str = "fail";

#[derive(Debug)]
pub enum CallbackOutcome {
    Paid { order_number: String, completed: bool },
    /// Повтор уже обработанного колбэка: ничего не меняем.
    Replayed { order_number: String, reason: String },
    /// Повтор колбэка для заказа, застрявшего в `paid`: панель синхронизирована заново.
    Resumed { order_number: String },
    /// Статус шлюза не `OD`.
    NotPaid { order_number: String, status: String },
    /// Сбой после проверки подписи. Шлюзу всё равно отвечаем `success`.
    Failed { order_number: String, error: AppError },
}

/// Ошибка означает, что колбэк отклонён и подтверждать его нельзя.
pub async fn process_callback(state: &AppState, body: &[u8]) -> Result<CallbackOutcome, AppError> {
    let params = hupijiao::parse_callback_body(body)?;
    let callback = hupijiao::verify_callback(state.signer.as_ref(), &state.config.gateway.appid, &params)?;

    let order = db::get_order_by_number(&state.pool, &callback.trade_order_id)
        .await?
        .ok_or(AppError::NotFound("order"))?;

    let expected = parse_cents(&order.amount);
    if expected.is_none() || expected != parse_cents(&callback.total_fee) {
        return Err(AppError::BadRequest(format!(
            "amount mismatch for order {}: expected {}, got {}",
            order.order_number, order.amount, callback.total_fee
        )));
    }

    if !callback.is_paid() {
        return Ok(CallbackOutcome::NotPaid {
            order_number: order.order_number,
            status: callback.status,
        });
    }

    let paid = match ledger::mark_paid(&state.pool, order.id, callback.gateway_txn_id()).await {
        Ok(paid) => paid,
        Err(AppError::Conflict(reason)) => return Ok(resume_or_replay(state, order, reason).await),
        Err(error) => {
            return Ok(CallbackOutcome::Failed {
                order_number: order.order_number,
                error,
            })
        }
    };

    let completed = match finish_provisioning(state, &paid.order).await {
        Ok(completed) => completed,
        Err(error) => {
            return Ok(CallbackOutcome::Failed {
                order_number: order.order_number,
                error,
            })
        }
    };

    Ok(CallbackOutcome::Paid {
        order_number: order.order_number,
        completed,
    })
}

/// Синхронизирует панель и закрывает заказ. `false`, если панель не настроена
/// и заказ остаётся в `paid`.
async fn finish_provisioning(state: &AppState, order: &Order) -> Result<bool, AppError> {
    let Some(panel) = state.panel.as_ref() else {
        return Ok(false);
    };

    provisioning::sync_panel(&state.pool, panel, order).await?;
    ledger::complete(&state.pool, order.id).await?;
    Ok(true)
}

/// Повторный колбэк. Если прошлая попытка оплатила заказ, но панель тогда
/// не ответила, доводим его до `completed`.
async fn resume_or_replay(state: &AppState, order: Order, reason: String) -> CallbackOutcome {
    let current = match db::get_order(&state.pool, order.id).await {
        Ok(Some(current)) => current,
        Ok(None) => {
            return CallbackOutcome::Failed {
                order_number: order.order_number,
                error: AppError::NotFound("order"),
            }
        }
        Err(e) => {
            return CallbackOutcome::Failed {
                order_number: order.order_number,
                error: e.into(),
            }
        }
    };

    if current.status != OrderStatus::Paid || state.panel.is_none() {
        return CallbackOutcome::Replayed {
            order_number: order.order_number,
            reason,
        };
    }

    match finish_provisioning(state, &current).await {
        Ok(_) => CallbackOutcome::Resumed {
            order_number: order.order_number,
        },
        Err(error) => CallbackOutcome::Failed {
            order_number: order.order_number,
            error,
        },
    }
}

#[utoipa::path(
    post,
    path = "/payment/notify",
    tag = "webhooks",
    request_body(content = String, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Literal `success`: callback accepted"),
        (status = 400, description = "Literal `fail`: signature, amount or payload rejected"),
        (status = 404, description = "Literal `fail`: unknown trade_order_id")
    )
)]
#[post("/payment/notify")]
pub async fn payment_notify(body: web::Bytes, state: web::Data<AppState>) -> HttpResponse {
    match process_callback(&state, &body).await {
        Ok(outcome) => {
            match &outcome {
                CallbackOutcome::Paid { order_number, completed } => {
                    log::info!("payment callback accepted order_number={order_number} completed={completed}");
                }
                CallbackOutcome::Replayed { order_number, reason } => {
                    log::info!("payment callback replay order_number={order_number}: {reason}");
                }
                CallbackOutcome::Resumed { order_number } => {
                    log::info!("payment callback replay completed stuck order order_number={order_number}");
                }
                CallbackOutcome::NotPaid { order_number, status } => {
                    log::info!("payment callback ignored order_number={order_number} status={status}");
                }
                CallbackOutcome::Failed { order_number, error } => {
                    log::error!("payment callback processing failed order_number={order_number}: {error}");
                }
            }
            HttpResponse::Ok().content_type("text/plain").body(ACK_BODY)
        }
        Err(e) => {
            match &e {
                AppError::SignatureInvalid => log::warn!("payment callback signature invalid"),
                e if e.status_code().is_server_error() => log::error!("payment callback failed: {e}"),
                e => log::warn!("payment callback rejected: {e}"),
            }
            HttpResponse::build(e.status_code())
                .content_type("text/plain")
                .body(FAIL_BODY)
        }
    }
}
