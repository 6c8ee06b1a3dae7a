// src/api/mod.rs

pub mod auth;
pub mod dashboard;
pub mod feed;
pub mod hupijiao;
pub mod hupijiao_client;
pub mod orders;
pub mod payments;
pub mod plans;
pub mod subscriptions;
pub mod webhooks_hupijiao;
pub mod xui_client;

use actix_web::web;

/// Все HTTP-роуты приложения. `AppState` должен быть добавлен через `app_data`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        // Публичные роуты
        .service(auth::register)
        .service(auth::login)
        .service(plans::list_plans)
        .service(plans::get_plan)
        // Колбэк шлюза (публичный, проверяется подписью)
        .service(webhooks_hupijiao::payment_notify)
        // Защищённые роуты
        .service(
            web::scope("/api")
                .wrap(auth::JwtMiddleware)
                .service(auth::me)
                .service(orders::create_order)
                .service(orders::list_orders)
                .service(orders::get_order)
                .service(orders::cancel_order)
                .service(payments::create_payment)
                .service(payments::payment_status)
                // `/link` раньше `/{id}`
                .service(subscriptions::subscription_link)
                .service(subscriptions::list_subscriptions)
                .service(subscriptions::get_subscription)
                .service(subscriptions::subscription_traffic)
                .service(dashboard::get_dashboard),
        );
}
