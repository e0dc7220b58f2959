use crate::{config::Config, services::ChatRelay};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub relay: ChatRelay,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(relay: ChatRelay, config: Arc<Config>) -> Self {
        Self { relay, config }
    }
}
