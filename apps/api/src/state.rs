use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::flows::FlowRunner;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<FlowRunner>,
    pub config: Config,
    /// Cancelled on shutdown. Each invocation runs under a child token.
    pub shutdown: CancellationToken,
}
