use actix_cors::Cors;
use actix_web::{http::Method, middleware, web, App, HttpServer};
use chat_relay_service::{
    config, db, error, logging, metrics, routes,
    services::{
        ChatRelay, HtmlEscaper, HttpPushTransport, InMemoryMessageStore, MessageStore,
        PgMessageStore,
    },
    state::AppState,
};
use std::sync::Arc;

fn build_cors(cfg: &config::Config) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec![Method::GET, Method::POST])
        .allow_any_header()
        .max_age(3600);

    if cfg.allows_any_origin() {
        return cors.allow_any_origin();
    }
    cfg.cors_allowed_origins
        .iter()
        .fold(cors, |cors, origin| cors.allowed_origin(origin))
}

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let store: Arc<dyn MessageStore> = match &cfg.database {
        Some(db_cfg) => {
            let pool = db::init_pool(db_cfg)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e:#}")))?;
            Arc::new(PgMessageStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, message history is kept in memory only");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    let transport = HttpPushTransport::new(cfg.push.timeout, cfg.push.ttl_seconds)
        .map_err(|e| error::AppError::StartServer(format!("push client: {e}")))?;

    let relay = ChatRelay::new(
        store,
        Arc::new(transport),
        Arc::new(HtmlEscaper),
        &cfg.push,
        cfg.history_limit,
    );
    let state = AppState::new(relay, cfg.clone());

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, relay_name = %cfg.push.relay_name, "starting chat-relay-service");

    let server_cfg = cfg.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(build_cors(&server_cfg))
            .wrap(metrics::MetricsMiddleware)
            .wrap(middleware::Logger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(routes::register_routes)
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("server: {e}")))
}
