use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::{
    account_handlers, b2b_handlers, b2c_handlers, qr_handlers, result_handlers,
    reversal_handlers, stk_handlers,
};
use crate::state::AppState;

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        // C2B / STK push
        .route("/initiate", post(stk_handlers::initiate_payment))
        .route(
            "/status/:checkout_request_id",
            get(stk_handlers::check_payment_status),
        )
        .route("/history", get(stk_handlers::payment_history))
        // B2C / B2B
        .route("/b2c", post(b2c_handlers::send_b2c_payment))
        .route("/b2c-transactions", get(b2c_handlers::list_b2c_transactions))
        .route("/b2b", post(b2b_handlers::send_b2b_payment))
        .route("/b2b-transactions", get(b2b_handlers::list_b2b_transactions))
        // Account queries
        .route("/balance", post(account_handlers::check_account_balance))
        .route(
            "/transaction-status",
            post(account_handlers::check_transaction_status),
        )
        // QR codes
        .route("/qrcode", post(qr_handlers::generate_qr_code))
        .route("/qrcodes", get(qr_handlers::list_qr_codes))
        // Reversals
        .route(
            "/transaction-reversal",
            post(reversal_handlers::reverse_transaction),
        )
        // Vendor-invoked webhooks
        .route("/callback", post(stk_handlers::mpesa_callback))
        .route("/result", post(result_handlers::mpesa_result))
        .route("/timeout", post(result_handlers::mpesa_timeout))
}
