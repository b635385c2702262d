//! Shared application state for the HTTP surface.
//!
//! Everything interesting lives in [`Gateway`]; this wrapper exists so axum
//! handlers get a cheap `Clone`.

use std::sync::Arc;

use crate::server::Gateway;

#[derive(Clone)]
pub struct AppState {
    gateway: Arc<Gateway>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }
}
