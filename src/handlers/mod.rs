pub(crate) mod account_handlers;
pub(crate) mod b2b_handlers;
pub(crate) mod b2c_handlers;
pub(crate) mod qr_handlers;
pub(crate) mod result_handlers;
pub(crate) mod reversal_handlers;
pub(crate) mod stk_handlers;

use serde::Serialize;

/// Envelope every user-facing endpoint returns. Vendor webhook endpoints
/// acknowledge with a bare `{"message": ...}` instead.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn ok_with_message(message: impl Into<String>, data: T) -> Self {
        ApiResponse {
            success: true,
            message: Some(message.into()),
            data: Some(data),
        }
    }
}

/// Vendor descriptions are occasionally empty; fall back to a fixed message.
pub(crate) fn message_or(message: &str, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_absent_fields() {
        let body = serde_json::to_value(ApiResponse::ok(1)).unwrap();
        assert_eq!(body, serde_json::json!({ "success": true, "data": 1 }));

        let body =
            serde_json::to_value(ApiResponse::ok_with_message("Accepted", "x")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "success": true, "message": "Accepted", "data": "x" })
        );
    }

    #[test]
    fn message_or_falls_back_on_blank() {
        assert_eq!(message_or("Accepted", "failed"), "Accepted");
        assert_eq!(message_or("  ", "failed"), "failed");
    }
}
