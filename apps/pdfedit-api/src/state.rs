//! Shared application state

use std::sync::Arc;

use pdfedit_core::JobRegistry;

use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub jobs: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            jobs: Arc::new(JobRegistry::new()),
        }
    }
}
