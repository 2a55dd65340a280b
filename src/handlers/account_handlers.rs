// handlers/account_handlers.rs
use axum::extract::{Json, State};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;
use tracing::info;

use crate::errors::{AppError, Result};
use crate::handlers::{message_or, ApiResponse};
use crate::models::balance::BalanceQuery;
use crate::models::status::TransactionStatus;
use crate::models::status_query::StatusQuery;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRequest {
    pub party_a: Option<String>,
    pub identifier_type: Option<i32>,
    pub remarks: Option<String>,
}

pub async fn check_account_balance(
    State(state): State<AppState>,
    Json(request): Json<BalanceRequest>,
) -> Result<Json<ApiResponse<BalanceQuery>>> {
    let (Some(party_a), Some(identifier_type), Some(remarks)) =
        (request.party_a, request.identifier_type, request.remarks)
    else {
        return Err(AppError::validation(
            "Party A, identifier type, and remarks are required",
        ));
    };

    let response = state
        .mpesa
        .account_balance(&party_a, identifier_type, &remarks)
        .await?;

    if response.response_code != "0" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "Account balance query failed",
        )));
    }

    let now = Utc::now();
    let query = BalanceQuery {
        id: Some(ObjectId::new()),
        conversation_id: response.conversation_id,
        originator_conversation_id: response.originator_conversation_id,
        party_a,
        identifier_type,
        remarks,
        status: TransactionStatus::Pending,
        result_code: None,
        result_desc: None,
        account_balance: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_balance_query(&query).await?;
    info!("Balance query created: {}", query.conversation_id);

    Ok(Json(ApiResponse::ok_with_message(
        response.response_description,
        query,
    )))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusRequest {
    pub transaction_id: Option<String>,
    pub party_a: Option<String>,
    pub identifier_type: Option<i32>,
    pub remarks: Option<String>,
    pub occasion: Option<String>,
}

pub async fn check_transaction_status(
    State(state): State<AppState>,
    Json(request): Json<TransactionStatusRequest>,
) -> Result<Json<ApiResponse<StatusQuery>>> {
    let (Some(transaction_id), Some(party_a), Some(identifier_type), Some(remarks)) = (
        request.transaction_id,
        request.party_a,
        request.identifier_type,
        request.remarks,
    ) else {
        return Err(AppError::validation(
            "Transaction ID, Party A, identifier type, and remarks are required",
        ));
    };

    let occasion = request.occasion.unwrap_or_default();

    let response = state
        .mpesa
        .transaction_status(&transaction_id, &party_a, identifier_type, &remarks, &occasion)
        .await?;

    if response.response_code != "0" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "Transaction status query failed",
        )));
    }

    let now = Utc::now();
    let query = StatusQuery {
        id: Some(ObjectId::new()),
        conversation_id: response.conversation_id,
        originator_conversation_id: response.originator_conversation_id,
        transaction_id,
        party_a,
        identifier_type,
        remarks,
        occasion,
        status: TransactionStatus::Pending,
        result_code: None,
        result_desc: None,
        receipt_number: None,
        transaction_data: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_status_query(&query).await?;
    info!("Status query created: {}", query.conversation_id);

    Ok(Json(ApiResponse::ok_with_message(
        response.response_description,
        query,
    )))
}
