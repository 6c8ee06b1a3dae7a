use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::auth::register,
        crate::api::auth::login,
        crate::api::auth::me,
        crate::api::plans::list_plans,
        crate::api::plans::get_plan,
        crate::api::orders::create_order,
        crate::api::orders::list_orders,
        crate::api::orders::get_order,
        crate::api::orders::cancel_order,
        crate::api::payments::create_payment,
        crate::api::payments::payment_status,
        crate::api::subscriptions::list_subscriptions,
        crate::api::subscriptions::subscription_link,
        crate::api::subscriptions::get_subscription,
        crate::api::subscriptions::subscription_traffic,
        crate::api::feed::subscription_feed,
        crate::api::dashboard::get_dashboard,
        crate::api::webhooks_hupijiao::payment_notify
    ),
    components(
        schemas(
            crate::api::auth::RegisterRequest,
            crate::api::auth::LoginRequest,
            crate::api::auth::AuthResponse,
            crate::api::orders::CreateOrderRequest,
            crate::api::orders::OrderPage,
            crate::api::payments::PaymentResponse,
            crate::api::payments::PaymentStatusResponse,
            crate::models::User,
            crate::models::Plan,
            crate::models::PlanPeriod,
            crate::models::Order,
            crate::models::OrderStatus,
            crate::models::Subscription,
            crate::models::TrafficLog,
            crate::provisioning::AccessLink,
            crate::dashboard::Dashboard,
            crate::dashboard::SubscriptionSummary,
            crate::dashboard::TrafficSummary,
            crate::dashboard::TrafficRecord
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration and login"),
        (name = "plans", description = "Plan catalog"),
        (name = "orders", description = "Order ledger"),
        (name = "payments", description = "Payment gateway"),
        (name = "subscriptions", description = "VPN subscriptions"),
        (name = "dashboard", description = "Account summary"),
        (name = "webhooks", description = "Callbacks from the payment gateway")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
