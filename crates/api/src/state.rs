use std::sync::Arc;

use posegrid_dispatcher::Dispatcher;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`. Cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    /// The workstation-side dispatcher all routes delegate to.
    pub dispatcher: Arc<Dispatcher>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
