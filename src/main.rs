// src/main.rs
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::io;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use vpn_storefront::config::Config;
use vpn_storefront::{api, docs, AppState};

async fn index() -> impl Responder {
    HttpResponse::Ok().body("Service ready!")
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    log::error!("{context}: {e}");
    io::Error::other(format!("{context}: {e}"))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(|e| startup_error("invalid configuration", e))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(|e| startup_error("failed to connect to DB", e))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .map_err(|e| startup_error("failed to run migrations", e))?;

    if config.panel.is_none() {
        log::warn!("XUI_BASE_URL is not set, paid orders will not be synced to the VPN panel");
    }

    if config.nodes.is_empty() {
        log::warn!("VPN_NODES is not set, subscription links will return an empty node list");
    }

    let bind_addr = config.bind_addr.clone();
    let feed_path = config.subscription_path.clone();
    let state = web::Data::new(
        AppState::new(pool, config).map_err(|e| startup_error("failed to build http clients", e))?,
    );

    log::info!("listening on {bind_addr}");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .route("/", web::get().to(index))
            .service(
                SwaggerUi::new("/docs/{_:.*}")
                    .url("/api-docs/openapi.json", docs::ApiDoc::openapi()),
            )
            .configure(api::configure)
            .configure(api::feed::configure(&feed_path))
    })
    .bind(bind_addr)?
    .run()
    .await
}
