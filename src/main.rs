use std::net::SocketAddr;
use std::sync::Arc;

use mpesa_payment_api::config::AppConfig;
use mpesa_payment_api::database;
use mpesa_payment_api::services::mpesa_service::MpesaService;
use mpesa_payment_api::state::AppState;
use mpesa_payment_api::store::TransactionStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env();
    tracing::info!("M-Pesa environment: {}", config.mpesa_environment);
    tracing::info!("Business shortcode: {}", config.mpesa_short_code);

    let db = database::connection::connect(&config.database_url)
        .await
        .expect("Failed to connect to MongoDB");

    let store = TransactionStore::new(db);
    let mpesa = Arc::new(MpesaService::new(config.clone()));

    // Warm the token cache and verify credentials; a failure here is not
    // fatal since the next request re-authenticates.
    match mpesa.get_access_token().await {
        Ok(_) => tracing::info!("M-Pesa access token obtained"),
        Err(e) => tracing::warn!("Could not obtain M-Pesa access token yet: {}", e),
    }

    let state = AppState::new(store, mpesa);
    let app = mpesa_payment_api::app(state, config.frontend_url.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("M-Pesa payment server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");
    axum::serve(listener, app).await.expect("Server error");
}
