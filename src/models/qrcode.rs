use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// A generated dynamic QR code. No asynchronous lifecycle: created once,
/// immediately ACTIVE. `qr_code_data` holds the rendered image as a data
/// URL; the raw vendor QR string is returned alongside but not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCode {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub merchant_name: String,
    pub ref_no: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    pub trx_code: String,
    pub cpi: String,
    pub size: String,
    pub qr_code_data: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
