// handlers/qr_handlers.rs
use axum::extract::{Json, State};
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use mongodb::bson::oid::ObjectId;
use qrcode::{render::svg, QrCode as QrMatrix};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::{AppError, Result};
use crate::handlers::{message_or, ApiResponse};
use crate::models::qrcode::QrCode;
use crate::state::AppState;

const VALID_TRX_CODES: [&str; 4] = ["BG", "WA", "PB", "SM"];
const DEFAULT_CPI: &str = "174379";
const DEFAULT_SIZE: u32 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeRequest {
    pub merchant_name: Option<String>,
    pub ref_no: Option<String>,
    pub amount: Option<f64>,
    pub trx_code: Option<String>,
    pub cpi: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeView {
    #[serde(flatten)]
    pub qr: QrCode,
    pub qr_code_string: String,
}

/// Renders the vendor-issued QR string as an SVG data URL.
fn render_qr_data_url(data: &str, size: u32) -> Result<String> {
    let matrix = QrMatrix::new(data.as_bytes())
        .map_err(|e| AppError::Internal(format!("QR render failed: {}", e)))?;
    let svg = matrix
        .render::<svg::Color>()
        .min_dimensions(size, size)
        .build();
    Ok(format!(
        "data:image/svg+xml;base64,{}",
        base64.encode(svg)
    ))
}

pub async fn generate_qr_code(
    State(state): State<AppState>,
    Json(request): Json<QrCodeRequest>,
) -> Result<Json<ApiResponse<QrCodeView>>> {
    let (Some(merchant_name), Some(ref_no), Some(trx_code)) =
        (request.merchant_name, request.ref_no, request.trx_code)
    else {
        return Err(AppError::validation(
            "Merchant name, reference number, and transaction code are required",
        ));
    };

    if !VALID_TRX_CODES.contains(&trx_code.as_str()) {
        return Err(AppError::validation(
            "Invalid transaction code. Use: BG, WA, PB, or SM",
        ));
    }
    if let Some(amount) = request.amount {
        if amount < 1.0 {
            return Err(AppError::validation("Amount must be at least 1 KSH"));
        }
    }

    let cpi = request
        .cpi
        .filter(|cpi| !cpi.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_CPI.to_string());
    let size = request.size.unwrap_or_else(|| DEFAULT_SIZE.to_string());
    let pixel_size = size.parse::<u32>().unwrap_or(DEFAULT_SIZE);

    let response = state
        .mpesa
        .generate_qr(&merchant_name, &ref_no, request.amount, &trx_code, &cpi)
        .await?;

    // QR generation acknowledges with "00" rather than "0".
    if response.response_code != "00" {
        return Err(AppError::mpesa(message_or(
            &response.response_description,
            "QR Code generation failed",
        )));
    }

    let qr_code_data = render_qr_data_url(&response.qr_code, pixel_size)?;

    let now = Utc::now();
    let qr = QrCode {
        id: Some(ObjectId::new()),
        merchant_name,
        ref_no,
        amount: request.amount,
        trx_code,
        cpi,
        size,
        qr_code_data,
        status: "ACTIVE".to_string(),
        created_at: now,
        updated_at: now,
    };
    state.store.create_qr_code(&qr).await?;
    info!("QR code generated for {}", qr.merchant_name);

    Ok(Json(ApiResponse::ok_with_message(
        "QR Code generated successfully",
        QrCodeView {
            qr,
            qr_code_string: response.qr_code,
        },
    )))
}

pub async fn list_qr_codes(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<QrCode>>>> {
    let qr_codes = state.store.recent_qr_codes().await?;
    Ok(Json(ApiResponse::ok(qr_codes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn renders_svg_data_url() {
        let url = render_qr_data_url("ws_QR_TEST_PAYLOAD", 300).unwrap();
        assert!(url.starts_with("data:image/svg+xml;base64,"));

        let encoded = url.trim_start_matches("data:image/svg+xml;base64,");
        let svg = String::from_utf8(base64.decode(encoded).unwrap()).unwrap();
        assert!(svg.contains("<svg"));
    }
}
