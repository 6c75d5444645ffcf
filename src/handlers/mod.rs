use std::sync::Arc;

use crate::services::{ObjectRegistry, TieredFileSystem};

pub mod health_handlers;
pub mod object_handlers;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: ObjectRegistry,
    pub fs: Arc<TieredFileSystem>,
}
