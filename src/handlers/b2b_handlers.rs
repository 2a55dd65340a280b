// handlers/b2b_handlers.rs
use axum::extract::{Json, State};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::handlers::{message_or, ApiResponse};
use crate::models::b2b::B2bTransaction;
use crate::models::status::TransactionStatus;
use crate::state::AppState;

const VALID_COMMANDS: [&str; 4] = [
    "BusinessPayBill",
    "BusinessBuyGoods",
    "DisburseFundsToBusiness",
    "BusinessToBusinessTransfer",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2bPaymentRequest {
    pub party_b: Option<String>,
    pub amount: Option<f64>,
    pub command_id: Option<String>,
    pub account_reference: Option<String>,
    pub remarks: Option<String>,
}

pub async fn send_b2b_payment(
    State(state): State<AppState>,
    Json(request): Json<B2bPaymentRequest>,
) -> Result<Json<ApiResponse<B2bTransaction>>> {
    let (Some(party_b), Some(amount), Some(command_id), Some(account_reference), Some(remarks)) = (
        request.party_b,
        request.amount,
        request.command_id,
        request.account_reference,
        request.remarks,
    ) else {
        return Err(AppError::validation("All fields are required"));
    };

    if amount < 1.0 {
        return Err(AppError::validation("Amount must be at least 1 KSH"));
    }
    if !VALID_COMMANDS.contains(&command_id.as_str()) {
        return Err(AppError::validation("Invalid command ID"));
    }

    let response = state
        .mpesa
        .b2b_payment(&party_b, amount, &command_id, &account_reference, &remarks)
        .await?;

    if response.response_code != "0" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "B2B Payment failed",
        )));
    }

    let now = Utc::now();
    let transaction = B2bTransaction {
        id: Some(ObjectId::new()),
        conversation_id: response.conversation_id,
        originator_conversation_id: response.originator_conversation_id,
        amount,
        party_a: state.mpesa.short_code().to_string(),
        party_b,
        command_id,
        account_reference,
        remarks,
        status: TransactionStatus::Pending,
        result_code: None,
        result_desc: None,
        transaction_id: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_b2b(&transaction).await?;
    info!("B2B transaction created: {}", transaction.conversation_id);

    Ok(Json(ApiResponse::ok_with_message(
        response.response_description,
        transaction,
    )))
}

pub async fn list_b2b_transactions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<B2bTransaction>>>> {
    let transactions = state.store.recent_b2b().await?;
    Ok(Json(ApiResponse::ok(transactions)))
}
