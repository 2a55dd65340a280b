// handlers/b2c_handlers.rs
use axum::extract::{Json, State};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::handlers::{message_or, ApiResponse};
use crate::models::b2c::B2cTransaction;
use crate::models::status::TransactionStatus;
use crate::services::mpesa_service::normalize_phone;
use crate::state::AppState;

const VALID_COMMANDS: [&str; 3] = ["SalaryPayment", "BusinessPayment", "PromotionPayment"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct B2cPaymentRequest {
    pub phone_number: Option<String>,
    pub amount: Option<f64>,
    pub command_id: Option<String>,
    pub remarks: Option<String>,
    pub occasion: Option<String>,
}

pub async fn send_b2c_payment(
    State(state): State<AppState>,
    Json(request): Json<B2cPaymentRequest>,
) -> Result<Json<ApiResponse<B2cTransaction>>> {
    let (Some(phone_number), Some(amount), Some(command_id), Some(remarks)) = (
        request.phone_number,
        request.amount,
        request.command_id,
        request.remarks,
    ) else {
        return Err(AppError::validation(
            "Phone number, amount, command ID, and remarks are required",
        ));
    };

    if amount < 1.0 {
        return Err(AppError::validation("Amount must be at least 1 KSH"));
    }
    if !VALID_COMMANDS.contains(&command_id.as_str()) {
        return Err(AppError::validation(
            "Invalid command ID. Use: SalaryPayment, BusinessPayment, or PromotionPayment",
        ));
    }

    let phone_number = normalize_phone(&phone_number)?;
    let occasion = request.occasion.unwrap_or_default();

    let response = state
        .mpesa
        .b2c_payment(&phone_number, amount, &command_id, &remarks, &occasion)
        .await?;

    if response.response_code != "0" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "B2C Payment failed",
        )));
    }

    let now = Utc::now();
    let transaction = B2cTransaction {
        id: Some(ObjectId::new()),
        conversation_id: response.conversation_id,
        originator_conversation_id: response.originator_conversation_id,
        amount,
        phone_number,
        command_id,
        remarks,
        occasion,
        status: TransactionStatus::Pending,
        result_code: None,
        result_desc: None,
        transaction_id: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_b2c(&transaction).await?;
    info!("B2C transaction created: {}", transaction.conversation_id);

    Ok(Json(ApiResponse::ok_with_message(
        response.response_description,
        transaction,
    )))
}

pub async fn list_b2c_transactions(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<B2cTransaction>>>> {
    let transactions = state.store.recent_b2c().await?;
    Ok(Json(ApiResponse::ok(transactions)))
}
