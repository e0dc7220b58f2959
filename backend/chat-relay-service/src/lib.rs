pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, RelayError};
pub use services::relay::ChatRelay;
pub use state::AppState;
pub use websocket::ConnectionId;
