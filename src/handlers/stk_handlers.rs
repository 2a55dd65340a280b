// handlers/stk_handlers.rs
use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use mongodb::bson::{doc, oid::ObjectId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::{AppError, Result};
use crate::handlers::{message_or, ApiResponse};
use crate::models::callbacks::StkCallbackEnvelope;
use crate::models::payment::Payment;
use crate::models::reversal::Reversal;
use crate::models::status::TransactionStatus;
use crate::services::mpesa_service::{normalize_phone, StkQueryOutcome};
use crate::services::status_poller::{poll_until_settled, PollObservation, PollSession, PollState};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub phone_number: Option<String>,
    pub amount: Option<f64>,
    pub account_reference: Option<String>,
    pub transaction_desc: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedPayment {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<ApiResponse<InitiatedPayment>>> {
    let (Some(phone_number), Some(amount), Some(account_reference)) = (
        request.phone_number,
        request.amount,
        request.account_reference,
    ) else {
        return Err(AppError::validation(
            "Phone number, amount, and account reference are required",
        ));
    };

    if amount < 1.0 {
        return Err(AppError::validation("Amount must be at least 1 KSH"));
    }

    let phone_number = normalize_phone(&phone_number)?;
    let transaction_desc = request
        .transaction_desc
        .unwrap_or_else(|| "Payment".to_string());

    let response = state
        .mpesa
        .stk_push(&phone_number, amount, &account_reference, &transaction_desc)
        .await?;

    if response.response_code != "0" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "STK Push failed",
        )));
    }

    let now = Utc::now();
    let payment = Payment {
        id: Some(ObjectId::new()),
        checkout_request_id: response.checkout_request_id.clone(),
        merchant_request_id: response.merchant_request_id.clone(),
        amount,
        phone_number,
        account_reference,
        transaction_desc,
        status: TransactionStatus::Pending,
        result_code: None,
        result_desc: None,
        mpesa_receipt_number: None,
        transaction_date: None,
        created_at: now,
        updated_at: now,
    };
    state.store.create_payment(&payment).await?;
    info!("Payment created: {}", payment.checkout_request_id);

    spawn_settlement_watch(state, payment.checkout_request_id.clone());

    Ok(Json(ApiResponse::ok_with_message(
        response.response_description,
        InitiatedPayment {
            checkout_request_id: payment.checkout_request_id,
            merchant_request_id: payment.merchant_request_id,
        },
    )))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    #[serde(flatten)]
    pub payment: Payment,
    pub rate_limited: bool,
}

pub async fn check_payment_status(
    State(state): State<AppState>,
    Path(checkout_request_id): Path<String>,
) -> Result<Json<ApiResponse<PaymentStatusView>>> {
    let (payment, rate_limited) = refresh_payment_status(&state, &checkout_request_id).await?;
    Ok(Json(ApiResponse::ok(PaymentStatusView {
        payment,
        rate_limited,
    })))
}

/// Returns the current record, re-querying the vendor while it is still
/// PENDING. A settled answer is written through the PENDING-conditional
/// update, so a concurrent callback and a live re-query converge on the
/// same terminal state.
pub(crate) async fn refresh_payment_status(
    state: &AppState,
    checkout_request_id: &str,
) -> Result<(Payment, bool)> {
    let payment = state
        .store
        .find_payment(checkout_request_id)
        .await?
        .ok_or_else(|| AppError::not_found("Payment not found"))?;

    if payment.status.is_terminal() {
        return Ok((payment, false));
    }

    match state.mpesa.stk_query(checkout_request_id).await? {
        StkQueryOutcome::Settled {
            result_code,
            result_desc,
        } => {
            let status = TransactionStatus::from_result_code(result_code);
            let settled = state
                .store
                .settle_payment(
                    checkout_request_id,
                    status,
                    Some(result_code),
                    Some(&result_desc),
                    doc! {},
                )
                .await?;
            match settled {
                Some(updated) => Ok((updated, false)),
                // Lost the race against a callback; return what it wrote.
                None => {
                    let current = state
                        .store
                        .find_payment(checkout_request_id)
                        .await?
                        .ok_or_else(|| AppError::not_found("Payment not found"))?;
                    Ok((current, false))
                }
            }
        }
        StkQueryOutcome::RateLimited => Ok((payment, true)),
        StkQueryOutcome::Processing => Ok((payment, false)),
    }
}

/// Server-side settlement watch for a freshly initiated payment: polls the
/// same status path the client sees until the record settles, widening the
/// interval when the vendor rate-limits. The task ends with the session, so
/// no timer outlives it.
fn spawn_settlement_watch(state: AppState, checkout_request_id: String) {
    tokio::spawn(async move {
        let id = checkout_request_id;
        let mut session = PollSession::new();

        let outcome = poll_until_settled(&mut session, || {
            let state = state.clone();
            let id = id.clone();
            async move {
                match refresh_payment_status(&state, &id).await {
                    Ok((payment, rate_limited)) => match payment.status {
                        TransactionStatus::Pending => PollObservation::Pending { rate_limited },
                        terminal => PollObservation::Terminal(terminal),
                    },
                    Err(err) => {
                        warn!("settlement watch probe failed for {}: {}", id, err);
                        PollObservation::Error
                    }
                }
            }
        })
        .await;

        match outcome {
            PollState::Settled(status) => info!("Payment {} settled: {}", id, status),
            PollState::Errored => warn!("Settlement watch for {} stopped on error", id),
            PollState::Checking => warn!("Settlement watch for {} gave up while pending", id),
        }
    });
}

pub async fn mpesa_callback(
    State(state): State<AppState>,
    Json(envelope): Json<StkCallbackEnvelope>,
) -> Result<Json<Value>> {
    let callback = envelope.body.stk_callback;
    info!(
        "STK callback for {}: code {:?} - {}",
        callback.checkout_request_id, callback.result_code, callback.result_desc
    );

    if state
        .store
        .find_payment(&callback.checkout_request_id)
        .await?
        .is_none()
    {
        warn!(
            "Payment not found for CheckoutRequestID: {}",
            callback.checkout_request_id
        );
        return Err(AppError::not_found("Payment not found"));
    }

    let status = callback
        .result_code
        .map(TransactionStatus::from_result_code)
        .unwrap_or(TransactionStatus::Failed);

    let mut extra = doc! {};
    if status == TransactionStatus::Success {
        if let Some(metadata) = &callback.callback_metadata {
            if let Some(receipt) = metadata.receipt_number() {
                extra.insert("mpesaReceiptNumber", receipt);
            }
            if let Some(date) = metadata.transaction_date() {
                extra.insert("transactionDate", date.to_rfc3339());
            }
        }
    }

    let settled = state
        .store
        .settle_payment(
            &callback.checkout_request_id,
            status,
            callback.result_code,
            Some(&callback.result_desc),
            extra,
        )
        .await?;

    if settled.is_none() {
        // Duplicate or late delivery against an already-terminal record.
        info!(
            "Payment {} already settled; callback ignored",
            callback.checkout_request_id
        );
    }

    Ok(Json(json!({ "message": "Callback processed successfully" })))
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryEntry {
    #[serde(flatten)]
    pub payment: Payment,
    pub reversal: Option<Reversal>,
}

pub async fn payment_history(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PaymentHistoryEntry>>>> {
    let payments = state.store.recent_payments().await?;

    let receipts: Vec<String> = payments
        .iter()
        .filter_map(|p| p.mpesa_receipt_number.clone())
        .collect();
    let reversals = state.store.reversals_for_receipts(&receipts).await?;

    let entries = payments
        .into_iter()
        .map(|payment| {
            let reversal = payment.mpesa_receipt_number.as_ref().and_then(|receipt| {
                reversals
                    .iter()
                    .find(|r| &r.transaction_id == receipt)
                    .cloned()
            });
            PaymentHistoryEntry { payment, reversal }
        })
        .collect();

    Ok(Json(ApiResponse::ok(entries)))
}
