// handlers/reversal_handlers.rs
use axum::extract::{Json, State};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::handlers::{message_or, ApiResponse};
use crate::models::reversal::Reversal;
use crate::models::status::TransactionStatus;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalRequest {
    pub transaction_id: Option<String>,
    pub amount: Option<f64>,
    pub receiver_party: Option<String>,
    pub remarks: Option<String>,
    pub occasion: Option<String>,
}

pub async fn reverse_transaction(
    State(state): State<AppState>,
    Json(request): Json<ReversalRequest>,
) -> Result<Json<ApiResponse<Reversal>>> {
    let (Some(transaction_id), Some(amount), Some(receiver_party)) = (
        request.transaction_id,
        request.amount,
        request.receiver_party,
    ) else {
        return Err(AppError::validation(
            "Transaction ID, amount, and receiver party are required",
        ));
    };

    if transaction_id.trim().is_empty() || receiver_party.trim().is_empty() {
        return Err(AppError::validation(
            "Transaction ID, amount, and receiver party are required",
        ));
    }
    if amount <= 0.0 {
        return Err(AppError::validation("Amount must be greater than 0"));
    }

    let remarks = request
        .remarks
        .unwrap_or_else(|| "Reversal requested by user".to_string());
    let occasion = request.occasion.unwrap_or_default();

    let response = state
        .mpesa
        .reverse_transaction(&transaction_id, amount, &receiver_party, &remarks, &occasion)
        .await?;

    if response.response_code != "0" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "Transaction reversal failed",
        )));
    }

    let now = Utc::now();
    let reversal = Reversal {
        id: Some(ObjectId::new()),
        conversation_id: response.conversation_id,
        originator_conversation_id: response.originator_conversation_id,
        transaction_id,
        amount,
        receiver_party,
        remarks,
        occasion,
        status: TransactionStatus::Pending,
        result_code: None,
        result_desc: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_reversal(&reversal).await?;
    info!("Reversal created: {}", reversal.conversation_id);

    Ok(Json(ApiResponse::ok_with_message(
        response.response_description,
        reversal,
    )))
}
