//! Shared application state handed to every axum handler, mirroring the
//! teacher's `AppState` pattern.

use std::sync::Arc;

use crate::dispatcher::UpdateDispatcher;
use crate::session::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub dispatcher: Arc<UpdateDispatcher>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, dispatcher: Arc<UpdateDispatcher>) -> Self {
        Self { registry, dispatcher }
    }
}
