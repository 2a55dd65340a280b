// services/mpesa_service.rs
use base64::{engine::general_purpose::STANDARD as base64, Engine as _};
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Normalizes a subscriber number to international MSISDN form.
/// `254XXXXXXXXX` passes through, `0XXXXXXXXX` has the zero replaced by the
/// country code, `7XXXXXXXX` gets the country code prepended. Anything else
/// is rejected before a single network call is made.
pub fn normalize_phone(phone: &str) -> Result<String> {
    let phone = phone.trim();
    let digits_only = !phone.is_empty() && phone.chars().all(|c| c.is_ascii_digit());

    if digits_only {
        if phone.len() == 12 && phone.starts_with("254") {
            return Ok(phone.to_string());
        }
        if phone.len() == 10 && phone.starts_with('0') {
            return Ok(format!("254{}", &phone[1..]));
        }
        if phone.len() == 9 && phone.starts_with('7') {
            return Ok(format!("254{}", phone));
        }
    }

    Err(AppError::validation(
        "Invalid phone number format. Please provide number as 07XXXXXXXX or 2547XXXXXXXX",
    ))
}

/// The STK password: base64 of shortcode + passkey + timestamp.
fn stk_password(short_code: &str, passkey: &str, timestamp: &str) -> String {
    base64.encode(format!("{}{}{}", short_code, passkey, timestamp))
}

/// Vendor timestamps use the packed `YYYYMMDDHHmmss` format.
fn timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

/// Whole-KES amount the vendor expects.
fn vendor_amount(amount: f64) -> u64 {
    amount.round() as u64
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    #[allow(dead_code)]
    expires_in: String,
}

#[derive(Debug, Default, Deserialize)]
struct VendorErrorBody {
    #[serde(rename = "errorCode", default)]
    error_code: String,
    #[serde(rename = "errorMessage", default)]
    error_message: String,
}

// STK push

#[derive(Debug, Serialize)]
struct StkPushRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TransactionType")]
    transaction_type: String,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "PhoneNumber")]
    phone_number: String,
    #[serde(rename = "CallBackURL")]
    callback_url: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "TransactionDesc")]
    transaction_desc: String,
}

#[derive(Debug, Deserialize)]
pub struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

// STK status query

#[derive(Debug, Serialize)]
struct StkQueryRequest {
    #[serde(rename = "BusinessShortCode")]
    business_short_code: String,
    #[serde(rename = "Password")]
    password: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: String,
}

#[derive(Debug, Deserialize)]
struct StkQueryResponse {
    #[serde(rename = "ResultCode", default)]
    result_code: Option<String>,
    #[serde(rename = "ResultDesc", default)]
    result_desc: Option<String>,
}

/// Outcome of a live STK status re-query. Rate limiting is a flow-control
/// signal for the poller, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum StkQueryOutcome {
    Settled { result_code: i32, result_desc: String },
    Processing,
    RateLimited,
}

// B2C / B2B / balance / status / reversal share the async accept shape

#[derive(Debug, Serialize)]
struct B2cRequest {
    #[serde(rename = "InitiatorName")]
    initiator_name: String,
    #[serde(rename = "SecurityCredential")]
    security_credential: String,
    #[serde(rename = "CommandID")]
    command_id: String,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "Remarks")]
    remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    result_url: String,
    #[serde(rename = "Occasion")]
    occasion: String,
}

#[derive(Debug, Serialize)]
struct B2bRequest {
    #[serde(rename = "Initiator")]
    initiator: String,
    #[serde(rename = "SecurityCredential")]
    security_credential: String,
    #[serde(rename = "CommandID")]
    command_id: String,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "PartyB")]
    party_b: String,
    #[serde(rename = "AccountReference")]
    account_reference: String,
    #[serde(rename = "Remarks")]
    remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    result_url: String,
}

#[derive(Debug, Serialize)]
struct BalanceRequest {
    #[serde(rename = "Initiator")]
    initiator: String,
    #[serde(rename = "SecurityCredential")]
    security_credential: String,
    #[serde(rename = "CommandID")]
    command_id: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "IdentifierType")]
    identifier_type: i32,
    #[serde(rename = "Remarks")]
    remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    result_url: String,
}

#[derive(Debug, Serialize)]
struct TransactionStatusRequest {
    #[serde(rename = "Initiator")]
    initiator: String,
    #[serde(rename = "SecurityCredential")]
    security_credential: String,
    #[serde(rename = "CommandID")]
    command_id: String,
    #[serde(rename = "TransactionID")]
    transaction_id: String,
    #[serde(rename = "PartyA")]
    party_a: String,
    #[serde(rename = "IdentifierType")]
    identifier_type: i32,
    #[serde(rename = "ResultURL")]
    result_url: String,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: String,
    #[serde(rename = "Remarks")]
    remarks: String,
    #[serde(rename = "Occasion")]
    occasion: String,
}

#[derive(Debug, Serialize)]
struct ReversalRequest {
    #[serde(rename = "Initiator")]
    initiator: String,
    #[serde(rename = "SecurityCredential")]
    security_credential: String,
    #[serde(rename = "CommandID")]
    command_id: String,
    #[serde(rename = "TransactionID")]
    transaction_id: String,
    #[serde(rename = "Amount")]
    amount: u64,
    #[serde(rename = "ReceiverParty")]
    receiver_party: String,
    // Vendor-contract spelling.
    #[serde(rename = "RecieverIdentifierType")]
    receiver_identifier_type: String,
    #[serde(rename = "ResultURL")]
    result_url: String,
    #[serde(rename = "QueueTimeOutURL")]
    queue_timeout_url: String,
    #[serde(rename = "Remarks")]
    remarks: String,
    #[serde(rename = "Occasion")]
    occasion: String,
}

/// Synchronous acknowledgement the vendor returns for every queued async
/// operation. `ResponseCode` "0" means the request was accepted for
/// processing, not that the transaction succeeded.
#[derive(Debug, Deserialize)]
pub struct AsyncAcceptResponse {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription")]
    pub response_description: String,
}

// QR code

#[derive(Debug, Serialize)]
struct QrRequest {
    #[serde(rename = "MerchantName")]
    merchant_name: String,
    #[serde(rename = "RefNo")]
    ref_no: String,
    #[serde(rename = "Amount", skip_serializing_if = "Option::is_none")]
    amount: Option<u64>,
    #[serde(rename = "TrxCode")]
    trx_code: String,
    #[serde(rename = "CPI")]
    cpi: String,
}

#[derive(Debug, Deserialize)]
pub struct QrResponse {
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "QRCode", default)]
    pub qr_code: String,
}

#[derive(Clone)]
pub struct MpesaService {
    config: AppConfig,
    client: Client,
    cached_token: Arc<RwLock<Option<(String, chrono::DateTime<Utc>)>>>,
}

impl MpesaService {
    pub fn new(config: AppConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        MpesaService {
            config,
            client,
            cached_token: Arc::new(RwLock::new(None)),
        }
    }

    pub fn environment(&self) -> &str {
        &self.config.mpesa_environment
    }

    pub fn short_code(&self) -> &str {
        &self.config.mpesa_short_code
    }

    pub async fn get_access_token(&self) -> Result<String> {
        {
            let cached = self.cached_token.read().unwrap();
            if let Some((token, expiry)) = cached.as_ref() {
                if *expiry > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(token.clone());
                }
            }
        }

        info!("Requesting new access token");
        let auth_string = format!(
            "{}:{}",
            self.config.mpesa_consumer_key, self.config.mpesa_consumer_secret
        );
        let encoded_auth = base64.encode(auth_string);

        let response = self
            .client
            .get(self.config.auth_url())
            .header(header::AUTHORIZATION, format!("Basic {}", encoded_auth))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to get access token: {} - {}", status, body);
            return Err(AppError::Upstream(format!("M-Pesa auth failed: {}", status)));
        }

        let auth_response: AuthResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Unexpected auth response: {}", e)))?;

        {
            // Tokens live for an hour; refresh five minutes early.
            let expiry_time = Utc::now() + chrono::Duration::hours(1);
            let mut cached = self.cached_token.write().unwrap();
            *cached = Some((auth_response.access_token.clone(), expiry_time));
        }

        Ok(auth_response.access_token)
    }

    async fn post<B, R>(&self, url: String, body: &B, op: &str) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let access_token = self.get_access_token().await?;

        let response = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("{} failed: {} - {}", op, status, text);
            return Err(vendor_error(op, &text));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Unexpected {} response: {}", op, e)))
    }

    // C2B: prompt the customer's device for payment authorization.
    pub async fn stk_push(
        &self,
        phone_number: &str,
        amount: f64,
        account_reference: &str,
        transaction_desc: &str,
    ) -> Result<StkPushResponse> {
        let formatted_phone = normalize_phone(phone_number)?;
        info!("STK push for {} - KSh {}", formatted_phone, amount);

        let timestamp = timestamp();
        let password = stk_password(
            &self.config.mpesa_short_code,
            &self.config.mpesa_passkey,
            &timestamp,
        );

        let request = StkPushRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline".to_string(),
            amount: vendor_amount(amount),
            party_a: formatted_phone.clone(),
            party_b: self.config.mpesa_short_code.clone(),
            phone_number: formatted_phone,
            callback_url: self.config.mpesa_callback_url.clone(),
            account_reference: account_reference.to_string(),
            transaction_desc: transaction_desc.to_string(),
        };

        let response: StkPushResponse = self
            .post(self.config.stk_push_url(), &request, "STK push")
            .await?;
        info!("STK push accepted: {}", response.checkout_request_id);
        Ok(response)
    }

    /// Live re-query of a pending STK push. A 429 from the vendor surfaces
    /// as `RateLimited`; a still-in-flight transaction as `Processing`.
    pub async fn stk_query(&self, checkout_request_id: &str) -> Result<StkQueryOutcome> {
        let access_token = self.get_access_token().await?;
        let timestamp = timestamp();
        let password = stk_password(
            &self.config.mpesa_short_code,
            &self.config.mpesa_passkey,
            &timestamp,
        );

        let request = StkQueryRequest {
            business_short_code: self.config.mpesa_short_code.clone(),
            password,
            timestamp,
            checkout_request_id: checkout_request_id.to_string(),
        };

        let response = self
            .client
            .post(self.config.stk_query_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            warn!("STK query rate limited for {}", checkout_request_id);
            return Ok(StkQueryOutcome::RateLimited);
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if let Ok(err) = serde_json::from_str::<VendorErrorBody>(&text) {
                // "The transaction is being processed" - not an error.
                if err.error_code == "500.001.1001" {
                    return Ok(StkQueryOutcome::Processing);
                }
            }
            error!("STK query failed: {} - {}", status, text);
            return Err(vendor_error("STK query", &text));
        }

        let decoded: StkQueryResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Unexpected STK query response: {}", e)))?;

        let settled = decoded
            .result_code
            .as_deref()
            .and_then(|code| code.trim().parse::<i32>().ok());

        match settled {
            Some(result_code) => Ok(StkQueryOutcome::Settled {
                result_code,
                result_desc: decoded.result_desc.unwrap_or_default(),
            }),
            None => Ok(StkQueryOutcome::Processing),
        }
    }

    // B2C: pay out from the business shortcode to a subscriber.
    pub async fn b2c_payment(
        &self,
        phone_number: &str,
        amount: f64,
        command_id: &str,
        remarks: &str,
        occasion: &str,
    ) -> Result<AsyncAcceptResponse> {
        let formatted_phone = normalize_phone(phone_number)?;
        info!("B2C {} to {} - KSh {}", command_id, formatted_phone, amount);

        let request = B2cRequest {
            initiator_name: self.config.mpesa_initiator_name.clone(),
            security_credential: self.config.mpesa_security_credential.clone(),
            command_id: command_id.to_string(),
            amount: vendor_amount(amount),
            party_a: self.config.mpesa_short_code.clone(),
            party_b: formatted_phone,
            remarks: remarks.to_string(),
            queue_timeout_url: self.config.mpesa_timeout_url.clone(),
            result_url: self.config.mpesa_result_url.clone(),
            occasion: occasion.to_string(),
        };

        let response: AsyncAcceptResponse = self
            .post(self.config.b2c_url(), &request, "B2C payment")
            .await?;
        info!("B2C accepted: {}", response.conversation_id);
        Ok(response)
    }

    // B2B: transfer between organization shortcodes.
    pub async fn b2b_payment(
        &self,
        party_b: &str,
        amount: f64,
        command_id: &str,
        account_reference: &str,
        remarks: &str,
    ) -> Result<AsyncAcceptResponse> {
        info!("B2B {} to {} - KSh {}", command_id, party_b, amount);

        let request = B2bRequest {
            initiator: self.config.mpesa_initiator_name.clone(),
            security_credential: self.config.mpesa_security_credential.clone(),
            command_id: command_id.to_string(),
            amount: vendor_amount(amount),
            party_a: self.config.mpesa_short_code.clone(),
            party_b: party_b.to_string(),
            account_reference: account_reference.to_string(),
            remarks: remarks.to_string(),
            queue_timeout_url: self.config.mpesa_timeout_url.clone(),
            result_url: self.config.mpesa_result_url.clone(),
        };

        let response: AsyncAcceptResponse = self
            .post(self.config.b2b_url(), &request, "B2B payment")
            .await?;
        info!("B2B accepted: {}", response.conversation_id);
        Ok(response)
    }

    pub async fn account_balance(
        &self,
        party_a: &str,
        identifier_type: i32,
        remarks: &str,
    ) -> Result<AsyncAcceptResponse> {
        let request = BalanceRequest {
            initiator: self.config.mpesa_initiator_name.clone(),
            security_credential: self.config.mpesa_security_credential.clone(),
            command_id: "AccountBalance".to_string(),
            party_a: party_a.to_string(),
            identifier_type,
            remarks: remarks.to_string(),
            queue_timeout_url: self.config.mpesa_timeout_url.clone(),
            result_url: self.config.mpesa_result_url.clone(),
        };

        let response: AsyncAcceptResponse = self
            .post(self.config.balance_url(), &request, "Account balance")
            .await?;
        info!("Balance query accepted: {}", response.conversation_id);
        Ok(response)
    }

    pub async fn transaction_status(
        &self,
        transaction_id: &str,
        party_a: &str,
        identifier_type: i32,
        remarks: &str,
        occasion: &str,
    ) -> Result<AsyncAcceptResponse> {
        let request = TransactionStatusRequest {
            initiator: self.config.mpesa_initiator_name.clone(),
            security_credential: self.config.mpesa_security_credential.clone(),
            command_id: "TransactionStatusQuery".to_string(),
            transaction_id: transaction_id.to_string(),
            party_a: party_a.to_string(),
            identifier_type,
            result_url: self.config.mpesa_result_url.clone(),
            queue_timeout_url: self.config.mpesa_timeout_url.clone(),
            remarks: remarks.to_string(),
            occasion: occasion.to_string(),
        };

        let response: AsyncAcceptResponse = self
            .post(
                self.config.transaction_status_url(),
                &request,
                "Transaction status",
            )
            .await?;
        info!("Status query accepted: {}", response.conversation_id);
        Ok(response)
    }

    pub async fn generate_qr(
        &self,
        merchant_name: &str,
        ref_no: &str,
        amount: Option<f64>,
        trx_code: &str,
        cpi: &str,
    ) -> Result<QrResponse> {
        let request = QrRequest {
            merchant_name: merchant_name.to_string(),
            ref_no: ref_no.to_string(),
            amount: amount.map(vendor_amount),
            trx_code: trx_code.to_string(),
            cpi: cpi.to_string(),
        };

        self.post(self.config.qr_url(), &request, "QR code generation")
            .await
    }

    pub async fn reverse_transaction(
        &self,
        transaction_id: &str,
        amount: f64,
        receiver_party: &str,
        remarks: &str,
        occasion: &str,
    ) -> Result<AsyncAcceptResponse> {
        info!("Reversal of {} - KSh {}", transaction_id, amount);

        let request = ReversalRequest {
            initiator: self.config.mpesa_initiator_name.clone(),
            security_credential: self.config.mpesa_security_credential.clone(),
            command_id: "TransactionReversal".to_string(),
            transaction_id: transaction_id.to_string(),
            amount: vendor_amount(amount),
            receiver_party: receiver_party.to_string(),
            receiver_identifier_type: "11".to_string(),
            result_url: self.config.mpesa_result_url.clone(),
            queue_timeout_url: self.config.mpesa_timeout_url.clone(),
            remarks: remarks.to_string(),
            occasion: occasion.to_string(),
        };

        let response: AsyncAcceptResponse = self
            .post(self.config.reversal_url(), &request, "Transaction reversal")
            .await?;
        info!("Reversal accepted: {}", response.conversation_id);
        Ok(response)
    }
}

fn vendor_error(op: &str, body: &str) -> AppError {
    match serde_json::from_str::<VendorErrorBody>(body) {
        Ok(err) if !err.error_message.is_empty() => AppError::Mpesa(err.error_message),
        _ => AppError::Mpesa(format!("{} failed", op)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;

    #[test]
    fn local_format_gets_country_code() {
        assert_eq!(normalize_phone("0712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone("0110123456").unwrap(), "254110123456");
    }

    #[test]
    fn international_format_passes_through() {
        assert_eq!(normalize_phone("254712345678").unwrap(), "254712345678");
        assert_eq!(normalize_phone(" 254712345678 ").unwrap(), "254712345678");
    }

    #[test]
    fn bare_subscriber_number_gets_country_code() {
        assert_eq!(normalize_phone("712345678").unwrap(), "254712345678");
    }

    #[test]
    fn other_shapes_are_rejected() {
        let rejected = [
            "",
            "12345",
            "07123456789",
            "25471234567",
            "+254712345678",
            "07abc45678",
        ];
        for input in rejected {
            assert!(
                normalize_phone(input).is_err(),
                "expected {:?} to be rejected",
                input
            );
        }
    }

    #[test]
    fn stk_password_is_base64_of_concatenation() {
        let password = stk_password("174379", "passkey", "20260101120000");
        let decoded = base64.decode(password).unwrap();
        assert_eq!(decoded, b"174379passkey20260101120000");
    }

    #[test]
    fn timestamp_is_packed_fourteen_digits() {
        let ts = timestamp();
        assert_eq!(ts.len(), 14);
        assert!(ts.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn vendor_amount_rounds_to_whole_kes() {
        assert_eq!(vendor_amount(99.5), 100);
        assert_eq!(vendor_amount(100.0), 100);
        assert_eq!(vendor_amount(100.4), 100);
    }

    #[test]
    fn vendor_error_prefers_vendor_message() {
        let body =
            r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#;
        match vendor_error("STK push", body) {
            AppError::Mpesa(msg) => assert_eq!(msg, "Bad Request - Invalid PhoneNumber"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn vendor_error_falls_back_to_generic_message() {
        match vendor_error("STK push", "<html>gateway error</html>") {
            AppError::Mpesa(msg) => assert_eq!(msg, "STK push failed"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
