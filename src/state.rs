use std::sync::Arc;

use crate::services::mpesa_service::MpesaService;
use crate::store::TransactionStore;

/// Shared per-process dependencies, passed by reference into every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: TransactionStore,
    pub mpesa: Arc<MpesaService>,
}

impl AppState {
    pub fn new(store: TransactionStore, mpesa: Arc<MpesaService>) -> Self {
        AppState { store, mpesa }
    }
}
