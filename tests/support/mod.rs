#![allow(dead_code)]

use sqlx::{PgPool, Row};
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

use vpn_storefront::api::hupijiao::{Md5Signer, Params, Signer, HASH_FIELD};
use vpn_storefront::config::{Config, GatewayConfig, PanelConfig, VpnNode};
use vpn_storefront::AppState;

pub const APPID: &str = "201906120001";
pub const APP_SECRET: &str = "test-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";

fn split_db_url(url: &str) -> Result<(String, String), String> {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base.to_string(), Some(query)),
        None => (url.to_string(), None),
    };

    let db_start = base
        .rfind('/')
        .ok_or_else(|| "invalid database url".to_string())?;
    if db_start + 1 >= base.len() {
        return Err("database name is empty".to_string());
    }

    let db_name = base[db_start + 1..].to_string();
    let mut admin_url = format!("{}postgres", &base[..db_start + 1]);
    if let Some(query) = query {
        admin_url = format!("{admin_url}?{query}");
    }

    Ok((admin_url, db_name))
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

static TEST_DB_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub struct TestDb {
    pub pool: PgPool,
    _guard: MutexGuard<'static, ()>,
}

/// Пересоздаёт тестовую БД. `None`, если TEST_DATABASE_URL не задан:
/// такие тесты просто пропускаются.
pub async fn init_test_db() -> Option<TestDb> {
    dotenvy::dotenv().ok();
    let Ok(test_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL is not set, skipping");
        return None;
    };
    let (admin_url, db_name) = split_db_url(&test_url).expect("invalid TEST_DATABASE_URL format");

    let lock = TEST_DB_LOCK.get_or_init(|| Mutex::new(()));
    let guard = lock.lock().await;

    let admin_pool = PgPool::connect(&admin_url).await.expect("connect admin db");

    let _ = sqlx::query("SELECT pg_advisory_lock(424242)")
        .execute(&admin_pool)
        .await;

    let quoted_name = quote_identifier(&db_name);
    let drop_sql = format!("DROP DATABASE IF EXISTS {quoted_name} WITH (FORCE)");
    let create_sql = format!("CREATE DATABASE {quoted_name}");

    let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
    if let Err(e) = sqlx::query(&create_sql).execute(&admin_pool).await {
        eprintln!("create test db error: {e}");
        let _ = sqlx::query(&drop_sql).execute(&admin_pool).await;
        sqlx::query(&create_sql)
            .execute(&admin_pool)
            .await
            .expect("create test db retry");
    }

    let _ = sqlx::query("SELECT pg_advisory_unlock(424242)")
        .execute(&admin_pool)
        .await;

    admin_pool.close().await;

    let pool = PgPool::connect(&test_url).await.expect("connect test db");
    sqlx::migrate!().run(&pool).await.expect("migrations");
    Some(TestDb { pool, _guard: guard })
}

pub fn test_config(gateway_url: &str, panel_url: Option<&str>) -> Config {
    Config {
        database_url: String::new(),
        bind_addr: "127.0.0.1:0".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        jwt_expire_days: 7,
        http_timeout: Duration::from_secs(2),
        subscription_base_url: "https://vpn.example.com".to_string(),
        subscription_path: "/sub".to_string(),
        nodes: vec![VpnNode {
            name: "Tokyo".to_string(),
            host: "jp.example.com".to_string(),
            port: 443,
        }],
        node_security: "none".to_string(),
        gateway: GatewayConfig {
            api_url: gateway_url.to_string(),
            appid: APPID.to_string(),
            app_secret: APP_SECRET.to_string(),
            notify_url: "https://shop.example.com/payment/notify".to_string(),
            return_url: "https://shop.example.com/orders".to_string(),
        },
        panel: panel_url.map(|url| PanelConfig {
            base_url: url.trim_end_matches('/').to_string(),
            panel_path: "/panel".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            inbound_id: 1,
            limit_ip: 3,
        }),
    }
}

pub fn build_state(pool: PgPool, gateway_url: &str, panel_url: Option<&str>) -> AppState {
    AppState::new(pool, test_config(gateway_url, panel_url)).expect("build state")
}

pub async fn insert_user(pool: &PgPool, email: &str) -> i32 {
    sqlx::query("INSERT INTO users (email, password_hash) VALUES ($1, 'test-hash') RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await
        .expect("insert user")
        .get("id")
}

pub async fn plan_id(pool: &PgPool, name: &str) -> i32 {
    sqlx::query("SELECT id FROM plans WHERE name = $1")
        .bind(name)
        .fetch_one(pool)
        .await
        .expect("seeded plan")
        .get("id")
}

pub fn bearer(state: &AppState, user_id: i32) -> (String, String) {
    let token = vpn_storefront::api::auth::generate_jwt(state, user_id).expect("jwt");
    ("Authorization".to_string(), format!("Bearer {token}"))
}

/// Тело колбэка шлюза, подписанное тестовым секретом.
pub fn signed_callback(order_number: &str, total_fee: &str, status: &str) -> Params {
    let mut params: Params = [
        ("appid", APPID),
        ("trade_order_id", order_number),
        ("total_fee", total_fee),
        ("transaction_id", "4200001234"),
        ("open_order_id", "20000123"),
        ("order_title", "VPN Monthly 200G"),
        ("status", status),
        ("nonce_str", "a1b2c3d4"),
        ("time", "1740830400"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    let hash = Md5Signer::new(APP_SECRET).sign(&params);
    params.insert(HASH_FIELD.to_string(), hash);
    params
}

pub fn form_body(params: &Params) -> String {
    serde_urlencoded::to_string(params).expect("encode form")
}
