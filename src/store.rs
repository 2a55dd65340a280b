use chrono::Utc;
use futures_util::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    options::ReturnDocument,
    Collection, Database,
};

use crate::errors::Result;
use crate::models::b2b::B2bTransaction;
use crate::models::b2c::B2cTransaction;
use crate::models::balance::BalanceQuery;
use crate::models::payment::Payment;
use crate::models::qrcode::QrCode;
use crate::models::reversal::Reversal;
use crate::models::status::TransactionStatus;
use crate::models::status_query::StatusQuery;

const RECENT_LIMIT: i64 = 50;

/// Which transaction kind a vendor `conversationId` belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationKind {
    B2c,
    B2b,
    Balance,
    StatusQuery,
}

/// Builds the `$set` document for a terminal transition. Kind-specific
/// fields (receipt number, balance, ...) ride along in `extra`.
fn terminal_update(
    status: TransactionStatus,
    result_code: Option<i32>,
    result_desc: Option<&str>,
    extra: Document,
) -> Document {
    let mut set = doc! {
        "status": status.as_str(),
        "resultCode": result_code.map(Bson::from).unwrap_or(Bson::Null),
        "resultDesc": result_desc.map(Bson::from).unwrap_or(Bson::Null),
        "updatedAt": Utc::now().to_rfc3339(),
    };
    set.extend(extra);
    doc! { "$set": set }
}

/// Matches a record by its correlation id only while it is still PENDING.
/// Terminal states absorb: a late or duplicate delivery matches nothing and
/// leaves the stored fields untouched.
fn pending_filter(key: &str, id: &str) -> Document {
    doc! { key: id, "status": TransactionStatus::Pending.as_str() }
}

#[derive(Clone)]
pub struct TransactionStore {
    db: Database,
}

impl TransactionStore {
    pub fn new(db: Database) -> Self {
        TransactionStore { db }
    }

    fn payments(&self) -> Collection<Payment> {
        self.db.collection("payments")
    }

    fn b2c_transactions(&self) -> Collection<B2cTransaction> {
        self.db.collection("b2c_transactions")
    }

    fn b2b_transactions(&self) -> Collection<B2bTransaction> {
        self.db.collection("b2b_transactions")
    }

    fn balance_queries(&self) -> Collection<BalanceQuery> {
        self.db.collection("balance_queries")
    }

    fn status_queries(&self) -> Collection<StatusQuery> {
        self.db.collection("status_queries")
    }

    fn qr_codes(&self) -> Collection<QrCode> {
        self.db.collection("qr_codes")
    }

    fn reversals(&self) -> Collection<Reversal> {
        self.db.collection("reversals")
    }

    // Payments (STK / C2B)

    pub async fn create_payment(&self, payment: &Payment) -> Result<()> {
        self.payments().insert_one(payment).await?;
        Ok(())
    }

    pub async fn find_payment(&self, checkout_request_id: &str) -> Result<Option<Payment>> {
        let payment = self
            .payments()
            .find_one(doc! { "checkoutRequestId": checkout_request_id })
            .await?;
        Ok(payment)
    }

    /// Terminal transition for a payment, applied only while PENDING.
    /// Returns the settled record, or `None` when nothing matched (unknown
    /// id or already terminal).
    pub async fn settle_payment(
        &self,
        checkout_request_id: &str,
        status: TransactionStatus,
        result_code: Option<i32>,
        result_desc: Option<&str>,
        extra: Document,
    ) -> Result<Option<Payment>> {
        let updated = self
            .payments()
            .find_one_and_update(
                pending_filter("checkoutRequestId", checkout_request_id),
                terminal_update(status, result_code, result_desc, extra),
            )
            .return_document(ReturnDocument::After)
            .await?;
        Ok(updated)
    }

    pub async fn recent_payments(&self) -> Result<Vec<Payment>> {
        let cursor = self
            .payments()
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .limit(RECENT_LIMIT)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    // B2C

    pub async fn create_b2c(&self, transaction: &B2cTransaction) -> Result<()> {
        self.b2c_transactions().insert_one(transaction).await?;
        Ok(())
    }

    pub async fn recent_b2c(&self) -> Result<Vec<B2cTransaction>> {
        let cursor = self
            .b2c_transactions()
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .limit(RECENT_LIMIT)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    // B2B

    pub async fn create_b2b(&self, transaction: &B2bTransaction) -> Result<()> {
        self.b2b_transactions().insert_one(transaction).await?;
        Ok(())
    }

    pub async fn recent_b2b(&self) -> Result<Vec<B2bTransaction>> {
        let cursor = self
            .b2b_transactions()
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .limit(RECENT_LIMIT)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    // Balance and status queries

    pub async fn create_balance_query(&self, query: &BalanceQuery) -> Result<()> {
        self.balance_queries().insert_one(query).await?;
        Ok(())
    }

    pub async fn create_status_query(&self, query: &StatusQuery) -> Result<()> {
        self.status_queries().insert_one(query).await?;
        Ok(())
    }

    // QR codes

    pub async fn create_qr_code(&self, qr: &QrCode) -> Result<()> {
        self.qr_codes().insert_one(qr).await?;
        Ok(())
    }

    pub async fn recent_qr_codes(&self) -> Result<Vec<QrCode>> {
        let cursor = self
            .qr_codes()
            .find(doc! {})
            .sort(doc! { "createdAt": -1 })
            .limit(RECENT_LIMIT)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    // Reversals

    pub async fn create_reversal(&self, reversal: &Reversal) -> Result<()> {
        self.reversals().insert_one(reversal).await?;
        Ok(())
    }

    /// Reversals whose `transactionId` matches one of the given receipt
    /// numbers. Used to attach reversals to payments in history listings.
    pub async fn reversals_for_receipts(&self, receipts: &[String]) -> Result<Vec<Reversal>> {
        if receipts.is_empty() {
            return Ok(Vec::new());
        }
        let cursor = self
            .reversals()
            .find(doc! { "transactionId": { "$in": receipts.to_vec() } })
            .await?;
        Ok(cursor.try_collect().await?)
    }

    // Async result reconciliation

    /// Resolves a vendor conversation id to the transaction kind that owns
    /// it. At most one kind matches; probing stops at the first hit.
    pub async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationKind>> {
        let filter = doc! { "conversationId": conversation_id };

        if self.b2c_transactions().find_one(filter.clone()).await?.is_some() {
            return Ok(Some(ConversationKind::B2c));
        }
        if self.b2b_transactions().find_one(filter.clone()).await?.is_some() {
            return Ok(Some(ConversationKind::B2b));
        }
        if self.balance_queries().find_one(filter.clone()).await?.is_some() {
            return Ok(Some(ConversationKind::Balance));
        }
        if self.status_queries().find_one(filter).await?.is_some() {
            return Ok(Some(ConversationKind::StatusQuery));
        }
        Ok(None)
    }

    /// Terminal transition for an async-result record, applied only while
    /// PENDING. Returns whether a record was actually modified.
    pub async fn settle_conversation(
        &self,
        kind: ConversationKind,
        conversation_id: &str,
        status: TransactionStatus,
        result_code: Option<i32>,
        result_desc: Option<&str>,
        extra: Document,
    ) -> Result<bool> {
        let filter = pending_filter("conversationId", conversation_id);
        let update = terminal_update(status, result_code, result_desc, extra);

        let modified = match kind {
            ConversationKind::B2c => {
                self.b2c_transactions()
                    .update_one(filter, update)
                    .await?
                    .modified_count
            }
            ConversationKind::B2b => {
                self.b2b_transactions()
                    .update_one(filter, update)
                    .await?
                    .modified_count
            }
            ConversationKind::Balance => {
                self.balance_queries()
                    .update_one(filter, update)
                    .await?
                    .modified_count
            }
            ConversationKind::StatusQuery => {
                self.status_queries()
                    .update_one(filter, update)
                    .await?
                    .modified_count
            }
        };
        Ok(modified > 0)
    }

    /// Marks every PENDING record carrying this conversation id TIMEOUT,
    /// across all four async kinds. Unrelated and already-settled records
    /// are untouched.
    pub async fn timeout_conversation(
        &self,
        conversation_id: &str,
        result_code: Option<i32>,
        result_desc: Option<&str>,
    ) -> Result<u64> {
        let update = || {
            terminal_update(
                TransactionStatus::Timeout,
                result_code,
                result_desc,
                doc! {},
            )
        };

        let mut modified = 0;
        modified += self
            .b2c_transactions()
            .update_many(pending_filter("conversationId", conversation_id), update())
            .await?
            .modified_count;
        modified += self
            .b2b_transactions()
            .update_many(pending_filter("conversationId", conversation_id), update())
            .await?
            .modified_count;
        modified += self
            .balance_queries()
            .update_many(pending_filter("conversationId", conversation_id), update())
            .await?
            .modified_count;
        modified += self
            .status_queries()
            .update_many(pending_filter("conversationId", conversation_id), update())
            .await?
            .modified_count;
        Ok(modified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_filter_guards_on_status() {
        let filter = pending_filter("checkoutRequestId", "ws_CO_1");
        assert_eq!(filter.get_str("checkoutRequestId").unwrap(), "ws_CO_1");
        assert_eq!(filter.get_str("status").unwrap(), "PENDING");
    }

    #[test]
    fn terminal_update_sets_status_and_result_fields() {
        let update = terminal_update(
            TransactionStatus::Success,
            Some(0),
            Some("The service request is processed successfully."),
            doc! { "mpesaReceiptNumber": "NLJ7RT61SV" },
        );

        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "SUCCESS");
        assert_eq!(set.get_i32("resultCode").unwrap(), 0);
        assert_eq!(set.get_str("mpesaReceiptNumber").unwrap(), "NLJ7RT61SV");
        assert!(set.get_str("updatedAt").is_ok());
    }

    #[test]
    fn terminal_update_stores_null_for_missing_result_code() {
        let update = terminal_update(TransactionStatus::Timeout, None, None, doc! {});
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "TIMEOUT");
        assert!(matches!(set.get("resultCode"), Some(Bson::Null)));
        assert!(matches!(set.get("resultDesc"), Some(Bson::Null)));
    }
}
