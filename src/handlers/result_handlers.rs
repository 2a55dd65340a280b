// handlers/result_handlers.rs
//
// Vendor-invoked reconciliation for the async flows (B2C, B2B, balance,
// transaction status). Never called by end users.
use axum::extract::{Json, State};
use mongodb::bson::doc;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::Result;
use crate::models::callbacks::{ResultEnvelope, TimeoutPayload};
use crate::models::status::TransactionStatus;
use crate::state::AppState;
use crate::store::ConversationKind;

pub async fn mpesa_result(
    State(state): State<AppState>,
    Json(envelope): Json<ResultEnvelope>,
) -> Result<Json<Value>> {
    let result = envelope.result;
    info!(
        "Result callback for {}: code {:?}",
        result.conversation_id, result.result_code
    );

    let Some(kind) = state.store.find_conversation(&result.conversation_id).await? else {
        warn!(
            "No transaction matches ConversationID: {}",
            result.conversation_id
        );
        return Ok(Json(json!({ "message": "Result processed successfully" })));
    };

    let status = result
        .result_code
        .map(TransactionStatus::from_result_code)
        .unwrap_or(TransactionStatus::Failed);

    let mut extra = doc! {};
    if status == TransactionStatus::Success {
        if let Some(params) = &result.result_parameters {
            match kind {
                ConversationKind::B2c | ConversationKind::B2b => {
                    if let Some(tx) = params.string_value("TransactionID") {
                        extra.insert("transactionId", tx);
                    }
                }
                ConversationKind::Balance => {
                    if let Some(balance) = params.string_value("AccountBalance") {
                        extra.insert("accountBalance", balance);
                    }
                }
                ConversationKind::StatusQuery => {
                    if let Some(receipt) = params.string_value("ReceiptNo") {
                        extra.insert("receiptNumber", receipt);
                    }
                    if let Some(raw) = params.raw_json() {
                        extra.insert("transactionData", raw);
                    }
                }
            }
        }
    }

    let modified = state
        .store
        .settle_conversation(
            kind,
            &result.conversation_id,
            status,
            result.result_code,
            result.result_desc.as_deref(),
            extra,
        )
        .await?;

    if !modified {
        info!(
            "Transaction {} already settled; result ignored",
            result.conversation_id
        );
    }

    Ok(Json(json!({ "message": "Result processed successfully" })))
}

pub async fn mpesa_timeout(
    State(state): State<AppState>,
    Json(payload): Json<TimeoutPayload>,
) -> Result<Json<Value>> {
    warn!("Timeout callback for {}", payload.conversation_id);

    let modified = state
        .store
        .timeout_conversation(
            &payload.conversation_id,
            payload.result_code,
            payload.result_desc.as_deref(),
        )
        .await?;
    info!(
        "Timeout marked {} record(s) for {}",
        modified, payload.conversation_id
    );

    Ok(Json(json!({ "message": "Timeout processed successfully" })))
}
