pub mod history;
pub mod wsroute;

use actix_web::web;

/// Register relay routes
pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(wsroute::ws_handler)
        .service(history::get_messages)
        .service(history::get_presence);
}
