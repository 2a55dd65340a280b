use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Vendor result codes arrive as a bare number in some payloads and a quoted
/// string in others; accept both.
fn lenient_code<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_code))
}

fn parse_code(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().map(|n| n as i32),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

/// Decode the vendor's packed `YYYYMMDDHHmmss` timestamp into a datetime.
pub fn decode_packed_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// STK callback: POST /callback

#[derive(Debug, Deserialize)]
pub struct StkCallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: StkCallbackBody,
}

#[derive(Debug, Deserialize)]
pub struct StkCallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,

    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,

    #[serde(rename = "ResultCode", deserialize_with = "lenient_code", default)]
    pub result_code: Option<i32>,

    #[serde(rename = "ResultDesc")]
    pub result_desc: String,

    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub items: Vec<CallbackItem>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackItem {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "Value", default)]
    pub value: Value,
}

impl CallbackMetadata {
    fn value_of(&self, name: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .map(|item| &item.value)
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.value_of("MpesaReceiptNumber").map(value_as_string)
    }

    /// `TransactionDate` arrives as a packed numeric timestamp.
    pub fn transaction_date(&self) -> Option<DateTime<Utc>> {
        let raw = self.value_of("TransactionDate").map(value_as_string)?;
        decode_packed_timestamp(&raw)
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Async result callback: POST /result (B2C, B2B, balance, status query)

#[derive(Debug, Deserialize)]
pub struct ResultEnvelope {
    #[serde(rename = "Result")]
    pub result: ResultPayload,
}

#[derive(Debug, Deserialize)]
pub struct ResultPayload {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,

    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: Option<String>,

    #[serde(rename = "ResultCode", deserialize_with = "lenient_code", default)]
    pub result_code: Option<i32>,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,

    #[serde(rename = "ResultParameters", default)]
    pub result_parameters: Option<ResultParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResultParameters {
    #[serde(rename = "ResultParameter")]
    pub parameters: Vec<ResultParameter>,
}

#[derive(Debug, Deserialize)]
pub struct ResultParameter {
    #[serde(rename = "Key")]
    pub key: String,

    #[serde(rename = "Value", default)]
    pub value: Value,
}

impl ResultParameters {
    pub fn string_value(&self, key: &str) -> Option<String> {
        self.parameters
            .iter()
            .find(|param| param.key == key)
            .map(|param| value_as_string(&param.value))
    }

    /// The full key/value list serialized back to JSON text, stored verbatim
    /// on status query records.
    pub fn raw_json(&self) -> Option<String> {
        let pairs: Vec<Value> = self
            .parameters
            .iter()
            .map(|param| {
                serde_json::json!({ "Key": param.key, "Value": param.value })
            })
            .collect();
        serde_json::to_string(&pairs).ok()
    }
}

// Queue timeout callback: POST /timeout

#[derive(Debug, Deserialize)]
pub struct TimeoutPayload {
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,

    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: Option<String>,

    #[serde(rename = "ResultCode", deserialize_with = "lenient_code", default)]
    pub result_code: Option<i32>,

    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use chrono::Timelike;

    #[test]
    fn stk_callback_accepts_string_result_code() {
        let json = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": "0",
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "Item": [
                            { "Name": "Amount", "Value": 100.0 },
                            { "Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV" },
                            { "Name": "TransactionDate", "Value": 20191219102115u64 },
                            { "Name": "PhoneNumber", "Value": 254712345678u64 }
                        ]
                    }
                }
            }
        });

        let envelope: StkCallbackEnvelope = serde_json::from_value(json).unwrap();
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.result_code, Some(0));

        let metadata = callback.callback_metadata.unwrap();
        assert_eq!(metadata.receipt_number().as_deref(), Some("NLJ7RT61SV"));

        let date = metadata.transaction_date().unwrap();
        assert_eq!(date.year(), 2019);
        assert_eq!(date.month(), 12);
        assert_eq!(date.day(), 19);
        assert_eq!(date.hour(), 10);
        assert_eq!(date.minute(), 21);
        assert_eq!(date.second(), 15);
    }

    #[test]
    fn stk_callback_accepts_numeric_result_code_without_metadata() {
        let json = serde_json::json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });

        let envelope: StkCallbackEnvelope = serde_json::from_value(json).unwrap();
        let callback = envelope.body.stk_callback;
        assert_eq!(callback.result_code, Some(1032));
        assert!(callback.callback_metadata.is_none());
    }

    #[test]
    fn result_parameters_extract_by_key() {
        let json = serde_json::json!({
            "Result": {
                "ResultType": 0,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "OriginatorConversationID": "10571-7910404-1",
                "ConversationID": "AG_20191219_00004e48cf7e3533f581",
                "TransactionID": "NLJ41HAY6Q",
                "ResultParameters": {
                    "ResultParameter": [
                        { "Key": "TransactionID", "Value": "NLJ41HAY6Q" },
                        { "Key": "TransactionAmount", "Value": 10 },
                        { "Key": "AccountBalance", "Value": "Working Account|KES|46713.00" }
                    ]
                }
            }
        });

        let envelope: ResultEnvelope = serde_json::from_value(json).unwrap();
        let result = envelope.result;
        assert_eq!(result.result_code, Some(0));

        let params = result.result_parameters.unwrap();
        assert_eq!(params.string_value("TransactionID").as_deref(), Some("NLJ41HAY6Q"));
        assert_eq!(params.string_value("TransactionAmount").as_deref(), Some("10"));
        assert_eq!(params.string_value("Missing"), None);

        let raw = params.raw_json().unwrap();
        assert!(raw.contains("AccountBalance"));
    }

    #[test]
    fn malformed_packed_timestamp_is_rejected() {
        assert!(decode_packed_timestamp("20191319102115").is_none());
        assert!(decode_packed_timestamp("not-a-date").is_none());
        assert!(decode_packed_timestamp("").is_none());
    }
}
