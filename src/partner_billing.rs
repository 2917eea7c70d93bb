//! Flight-credit ledger
//!
//! Partner credit purchases and consumption live in the `partner_transaction` MongoDB
//! collection. The summary is computed in-process from the partner's documents.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use futures_util::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::{Client, Collection};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};
use utoipa::ToSchema;

use async_trait::async_trait;

const COLLECTION: &str = "partner_transaction";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("MONGODB_URI is not set")]
    NotConfigured,
    #[error("MongoDB query failed: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Credit,
    Debit,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartnerTransaction {
    pub transaction_type: TransactionType,
    pub value: f64,
    pub created_at: Option<DateTime<Utc>>,
}

impl PartnerTransaction {
    pub fn credit(value: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            transaction_type: TransactionType::Credit,
            value,
            created_at: Some(created_at),
        }
    }

    pub fn debit(value: f64, created_at: DateTime<Utc>) -> Self {
        Self {
            transaction_type: TransactionType::Debit,
            value,
            created_at: Some(created_at),
        }
    }

    /// Reads a ledger document; values may be stored as int or double and dates as BSON dates
    /// or RFC 3339 strings.
    pub fn from_document(document: &Document) -> Self {
        let transaction_type = match document.get_str("transaction_type") {
            Ok("Credit") => TransactionType::Credit,
            Ok("Debit") => TransactionType::Debit,
            _ => TransactionType::Other,
        };
        let value = match document.get("value") {
            Some(Bson::Double(v)) => *v,
            Some(Bson::Int32(v)) => f64::from(*v),
            Some(Bson::Int64(v)) => *v as f64,
            _ => 0.0,
        };
        let created_at = match document.get("created_at") {
            Some(Bson::DateTime(dt)) => DateTime::from_timestamp_millis(dt.timestamp_millis()),
            Some(Bson::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        };
        Self {
            transaction_type,
            value,
            created_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FcSummary {
    pub fc_remaining: f64,
    pub fc_bought: f64,
    pub fc_consumed: f64,
    #[serde(rename = "fcConsumedMTD")]
    pub fc_consumed_mtd: f64,
    #[serde(rename = "fcConsumedYTD")]
    pub fc_consumed_ytd: f64,
}

/// Credits add to `fc_bought`, debits to `fc_consumed`; debits dated between the start of the
/// current UTC month (or year) and `now` also count toward MTD (YTD).
pub fn summarize(transactions: &[PartnerTransaction], now: DateTime<Utc>) -> FcSummary {
    let start_of_month = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single();
    let start_of_year = Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single();
    let within = |created_at: Option<DateTime<Utc>>, start: Option<DateTime<Utc>>| match (
        created_at, start,
    ) {
        (Some(at), Some(start)) => at >= start && at <= now,
        _ => false,
    };

    let mut summary = FcSummary::default();
    for tx in transactions {
        match tx.transaction_type {
            TransactionType::Credit => summary.fc_bought += tx.value,
            TransactionType::Debit => {
                summary.fc_consumed += tx.value;
                if within(tx.created_at, start_of_month) {
                    summary.fc_consumed_mtd += tx.value;
                }
                if within(tx.created_at, start_of_year) {
                    summary.fc_consumed_ytd += tx.value;
                }
            }
            TransactionType::Other => {}
        }
    }
    summary.fc_remaining = summary.fc_bought - summary.fc_consumed;
    summary
}

#[async_trait]
pub trait PartnerLedger: Send + Sync {
    async fn transactions(
        &self,
        partner_org_id: &str,
    ) -> Result<Vec<PartnerTransaction>, LedgerError>;
}

/// Ledger backed by MongoDB; the client connects on first use.
pub struct MongoLedger {
    uri: Option<String>,
    database: String,
    client: OnceCell<Client>,
}

impl MongoLedger {
    pub fn new(uri: Option<String>, database: impl Into<String>) -> Self {
        Self {
            uri,
            database: database.into(),
            client: OnceCell::new(),
        }
    }

    async fn collection(&self) -> Result<Collection<Document>, LedgerError> {
        let uri = self.uri.as_deref().ok_or(LedgerError::NotConfigured)?;
        let client = self
            .client
            .get_or_try_init(|| async { Client::with_uri_str(uri).await })
            .await?;
        Ok(client.database(&self.database).collection(COLLECTION))
    }
}

#[async_trait]
impl PartnerLedger for MongoLedger {
    async fn transactions(
        &self,
        partner_org_id: &str,
    ) -> Result<Vec<PartnerTransaction>, LedgerError> {
        let collection = self.collection().await?;
        let documents: Vec<Document> = collection
            .find(doc! { "partner_org_id": partner_org_id })
            .await?
            .try_collect()
            .await?;
        debug!(partner_org_id, count = documents.len(), "Loaded partner transactions");

        let transactions: Vec<PartnerTransaction> =
            documents.iter().map(PartnerTransaction::from_document).collect();
        let unknown = transactions
            .iter()
            .filter(|tx| tx.transaction_type == TransactionType::Other)
            .count();
        if unknown > 0 {
            warn!(partner_org_id, unknown, "Ignoring transactions with unknown type");
        }
        Ok(transactions)
    }
}

/// Fixed ledger keyed by partner id
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Vec<(String, PartnerTransaction)>,
}

impl InMemoryLedger {
    pub fn new(entries: Vec<(String, PartnerTransaction)>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl PartnerLedger for InMemoryLedger {
    async fn transactions(
        &self,
        partner_org_id: &str,
    ) -> Result<Vec<PartnerTransaction>, LedgerError> {
        Ok(self
            .entries
            .iter()
            .filter(|(partner, _)| partner == partner_org_id)
            .map(|(_, tx)| tx.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn aggregates_credits_debits_and_windows() {
        let now = at(2025, 6, 15);
        let txs = vec![
            PartnerTransaction::credit(1000.0, at(2024, 11, 1)),
            PartnerTransaction::credit(500.0, at(2025, 2, 1)),
            PartnerTransaction::debit(100.0, at(2024, 12, 20)),
            PartnerTransaction::debit(200.0, at(2025, 3, 10)),
            PartnerTransaction::debit(50.0, at(2025, 6, 2)),
            // Future-dated debits count toward the total only
            PartnerTransaction::debit(25.0, now + Duration::days(3)),
        ];

        let summary = summarize(&txs, now);
        assert_eq!(summary.fc_bought, 1500.0);
        assert_eq!(summary.fc_consumed, 375.0);
        assert_eq!(summary.fc_consumed_mtd, 50.0);
        assert_eq!(summary.fc_consumed_ytd, 250.0);
        assert_eq!(summary.fc_remaining, 1125.0);
    }

    #[test]
    fn reads_int_and_string_encoded_documents() {
        let document = doc! {
            "partner_org_id": "p1",
            "transaction_type": "Debit",
            "value": 7_i32,
            "created_at": "2025-06-01T08:00:00Z",
        };
        let tx = PartnerTransaction::from_document(&document);
        assert_eq!(tx.transaction_type, TransactionType::Debit);
        assert_eq!(tx.value, 7.0);
        assert_eq!(tx.created_at, Some(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()));

        let refund = PartnerTransaction::from_document(&doc! { "transaction_type": "Refund" });
        assert_eq!(refund.transaction_type, TransactionType::Other);
        assert_eq!(refund.value, 0.0);
    }

    #[test]
    fn summary_serializes_with_upper_case_windows() {
        let json = serde_json::to_value(FcSummary::default()).unwrap();
        assert!(json.get("fcConsumedMTD").is_some());
        assert!(json.get("fcConsumedYTD").is_some());
        assert!(json.get("fcRemaining").is_some());
    }

    #[tokio::test]
    async fn in_memory_ledger_filters_by_partner() {
        let ledger = InMemoryLedger::new(vec![
            ("p1".into(), PartnerTransaction::credit(10.0, at(2025, 1, 1))),
            ("p2".into(), PartnerTransaction::credit(99.0, at(2025, 1, 1))),
        ]);
        assert_eq!(ledger.transactions("p1").await.unwrap().len(), 1);
        assert!(ledger.transactions("p3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unconfigured_mongo_ledger_errors() {
        let ledger = MongoLedger::new(None, "billing");
        assert!(matches!(
            ledger.transactions("p1").await,
            Err(LedgerError::NotConfigured)
        ));
    }
}
