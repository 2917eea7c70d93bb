//! HubSpot CRM import
//!
//! Companies, contacts and deals are synced as independent phases, then association linking
//! fills in `company_id`. A failed phase is reported in `errors` and the later phases still run.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::HubSpotClient;
use crate::connectors::hubspot::{
    COMPANY_PROPERTIES, CONTACT_PROPERTIES, CrmObject, DEAL_PROPERTIES, MAX_PAGE_SIZE,
    NOTE_PROPERTIES, ObjectType,
};
use crate::models::{company, contact, deal, deal_engagement};
use crate::repositories::sync_run::MODE_FULL;
use crate::repositories::{CrmRepository, SyncRunRepository};

use super::associations::{AssociationLinker, LinkStats};
use super::{
    Chunk, EmbeddingCandidate, RecordSink, RecordSource, SyncError, SyncOptions, run_recorded,
};

const DEFAULT_LIMIT: usize = 1000;

fn default_true() -> bool {
    true
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

/// Body of `POST /api/hubspot/sync`
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HubSpotSyncRequest {
    #[serde(default = "default_true")]
    pub sync_companies: bool,
    #[serde(default = "default_true")]
    pub sync_contacts: bool,
    #[serde(default = "default_true")]
    pub sync_deals: bool,
    #[serde(default = "default_limit")]
    pub companies_limit: usize,
    #[serde(default = "default_limit")]
    pub contacts_limit: usize,
    #[serde(default = "default_limit")]
    pub deals_limit: usize,
}

impl Default for HubSpotSyncRequest {
    fn default() -> Self {
        Self {
            sync_companies: true,
            sync_contacts: true,
            sync_deals: true,
            companies_limit: DEFAULT_LIMIT,
            contacts_limit: DEFAULT_LIMIT,
            deals_limit: DEFAULT_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HubSpotSyncStats {
    pub companies: u64,
    pub contacts: u64,
    pub deals: u64,
    pub associations: Option<LinkStats>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EngagementSyncResult {
    pub deal_id: Uuid,
    pub hubspot_deal_id: String,
    pub engagements: u64,
}

/// Pages one CRM object family
pub struct HubSpotSource {
    client: HubSpotClient,
    object: ObjectType,
    properties: &'static [&'static str],
    label: String,
}

impl HubSpotSource {
    pub fn new(client: HubSpotClient, object: ObjectType) -> Self {
        let properties = match object {
            ObjectType::Companies => COMPANY_PROPERTIES,
            ObjectType::Contacts => CONTACT_PROPERTIES,
            ObjectType::Deals => DEAL_PROPERTIES,
            ObjectType::Notes => NOTE_PROPERTIES,
        };
        Self {
            client,
            object,
            properties,
            label: format!("hubspot_{}", object.as_str()),
        }
    }
}

#[async_trait]
impl RecordSource for HubSpotSource {
    type Record = CrmObject;

    fn name(&self) -> &str {
        &self.label
    }

    async fn next_chunk(
        &mut self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Chunk<CrmObject>, SyncError> {
        let page = self
            .client
            .list_objects(self.object, self.properties, page_size as u32, cursor)
            .await?;
        Ok(Chunk {
            records: page.results,
            skipped: 0,
            next_cursor: page.next_after,
        })
    }
}

/// HubSpot dates come as RFC 3339 or epoch milliseconds
fn parse_hubspot_time(value: &str) -> Option<DateTime<FixedOffset>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed);
    }
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.fixed_offset())
}

pub fn company_row(object: &CrmObject) -> company::ActiveModel {
    let now = Utc::now().fixed_offset();
    company::ActiveModel {
        id: Set(Uuid::new_v4()),
        hubspot_company_id: Set(object.id.clone()),
        name: Set(object.prop("name")),
        domain: Set(object.prop("domain")),
        website: Set(object.prop("website")),
        phone: Set(object.prop("phone")),
        industry: Set(object.prop("industry")),
        raw_data: Set(object.properties_json()),
        hubspot_synced_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

pub fn contact_row(object: &CrmObject) -> contact::ActiveModel {
    let now = Utc::now().fixed_offset();
    contact::ActiveModel {
        id: Set(Uuid::new_v4()),
        hubspot_contact_id: Set(object.id.clone()),
        email: Set(object.prop("email").map(|e| e.to_lowercase())),
        first_name: Set(object.prop("firstname")),
        last_name: Set(object.prop("lastname")),
        phone: Set(object.prop("phone")),
        company_name: Set(object.prop("company")),
        company_id: Set(None),
        raw_data: Set(object.properties_json()),
        hubspot_synced_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

pub fn deal_row(object: &CrmObject) -> deal::ActiveModel {
    let now = Utc::now().fixed_offset();
    deal::ActiveModel {
        id: Set(Uuid::new_v4()),
        hubspot_deal_id: Set(object.id.clone()),
        name: Set(object.prop("dealname")),
        amount: Set(object.prop("amount").and_then(|a| a.parse::<f64>().ok())),
        stage: Set(object.prop("dealstage")),
        pipeline: Set(object.prop("pipeline")),
        close_date: Set(object.prop("closedate").as_deref().and_then(parse_hubspot_time)),
        company_id: Set(None),
        raw_data: Set(object.properties_json()),
        hubspot_synced_at: Set(now),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

pub fn engagement_row(deal_id: Uuid, note: &CrmObject) -> deal_engagement::ActiveModel {
    let now = Utc::now().fixed_offset();
    let body = note.prop("hs_note_body");
    // First line of the note doubles as its title
    let title = body
        .as_deref()
        .and_then(|b| b.lines().map(str::trim).find(|l| !l.is_empty()))
        .map(|l| l.chars().take(200).collect::<String>());
    deal_engagement::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(deal_id),
        hubspot_engagement_id: Set(note.id.clone()),
        engagement_type: Set(note.prop("hs_note_type").unwrap_or_else(|| "NOTE".to_string())),
        title: Set(title),
        body: Set(body),
        occurred_at: Set(note.prop("hs_timestamp").as_deref().and_then(parse_hubspot_time)),
        created_at: Set(now),
        updated_at: Set(now),
    }
}

/// Upserts one object family into its table
pub struct CrmSink {
    crm: CrmRepository,
    object: ObjectType,
}

impl CrmSink {
    pub fn new(crm: CrmRepository, object: ObjectType) -> Self {
        Self { crm, object }
    }
}

#[async_trait]
impl RecordSink<CrmObject> for CrmSink {
    async fn upsert(&self, records: Vec<CrmObject>) -> Result<Vec<EmbeddingCandidate>, SyncError> {
        match self.object {
            ObjectType::Companies => {
                self.crm
                    .upsert_companies(records.iter().map(company_row).collect())
                    .await?;
            }
            ObjectType::Contacts => {
                self.crm
                    .upsert_contacts(records.iter().map(contact_row).collect())
                    .await?;
            }
            ObjectType::Deals => {
                self.crm
                    .upsert_deals(records.iter().map(deal_row).collect())
                    .await?;
            }
            ObjectType::Notes => {
                return Err(SyncError::Other(anyhow::anyhow!(
                    "notes are synced per deal"
                )));
            }
        }
        Ok(Vec::new())
    }
}

pub struct HubSpotSync {
    client: HubSpotClient,
    crm: CrmRepository,
    runs: SyncRunRepository,
    chunk_delay: Duration,
}

impl HubSpotSync {
    pub fn new(
        client: HubSpotClient,
        crm: CrmRepository,
        runs: SyncRunRepository,
        chunk_delay: Duration,
    ) -> Self {
        Self {
            client,
            crm,
            runs,
            chunk_delay,
        }
    }

    /// Runs the enabled phases, then association linking.
    #[instrument(skip(self, request), fields(user_id = %user_id))]
    pub async fn run(&self, user_id: Uuid, request: &HubSpotSyncRequest) -> HubSpotSyncStats {
        let started = std::time::Instant::now();
        let mut stats = HubSpotSyncStats {
            started_at: Utc::now(),
            ..Default::default()
        };

        let phases = [
            (request.sync_companies, ObjectType::Companies, request.companies_limit),
            (request.sync_contacts, ObjectType::Contacts, request.contacts_limit),
            (request.sync_deals, ObjectType::Deals, request.deals_limit),
        ];
        for (enabled, object, limit) in phases {
            if !enabled {
                continue;
            }
            let saved = match self.sync_phase(user_id, object, limit).await {
                Ok((saved, errors)) => {
                    stats.errors.extend(
                        errors
                            .into_iter()
                            .map(|e| format!("{} sync failed: {}", object.as_str(), e)),
                    );
                    saved
                }
                Err(e) => {
                    warn!(object = object.as_str(), error = %e, "HubSpot phase failed");
                    stats
                        .errors
                        .push(format!("{} sync failed: {}", object.as_str(), e));
                    0
                }
            };
            match object {
                ObjectType::Companies => stats.companies = saved,
                ObjectType::Contacts => stats.contacts = saved,
                _ => stats.deals = saved,
            }
        }

        match self.linker().link_associations().await {
            Ok(linked) => stats.associations = Some(linked),
            Err(e) => {
                warn!(error = %e, "Association linking failed");
                stats
                    .errors
                    .push(format!("Association linking failed: {}", e));
            }
        }

        stats.finished_at = Some(Utc::now());
        stats.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            companies = stats.companies,
            contacts = stats.contacts,
            deals = stats.deals,
            errors = stats.errors.len(),
            "HubSpot sync finished"
        );
        stats
    }

    async fn sync_phase(
        &self,
        user_id: Uuid,
        object: ObjectType,
        limit: usize,
    ) -> Result<(u64, Vec<String>), SyncError> {
        let mut source = HubSpotSource::new(self.client.clone(), object);
        let sink = CrmSink::new(self.crm.clone(), object);
        let options = SyncOptions {
            page_size: limit.clamp(1, MAX_PAGE_SIZE as usize),
            max_records: limit,
            chunk_delay: self.chunk_delay,
            enqueue_embeddings: false,
            start_cursor: None,
        };
        let outcome = run_recorded(
            &self.runs,
            Some(user_id),
            MODE_FULL,
            &mut source,
            &sink,
            None,
            &options,
        )
        .await?;
        Ok((outcome.saved, outcome.errors))
    }

    pub fn linker(&self) -> AssociationLinker {
        AssociationLinker::new(self.client.clone(), self.crm.clone())
    }

    /// Pulls the notes associated with a synced deal into `deal_engagements`.
    #[instrument(skip(self))]
    pub async fn sync_deal_engagements(
        &self,
        hubspot_deal_id: &str,
    ) -> Result<Option<EngagementSyncResult>, SyncError> {
        let Some(deal) = self.crm.find_deal_by_hubspot_id(hubspot_deal_id).await? else {
            return Ok(None);
        };

        let note_ids = self.client.deal_note_ids(hubspot_deal_id).await?;
        let notes = self
            .client
            .batch_read(ObjectType::Notes, &note_ids, NOTE_PROPERTIES)
            .await?;
        let saved = self
            .crm
            .upsert_engagements(notes.iter().map(|n| engagement_row(deal.id, n)).collect())
            .await?;

        info!(deal_id = %deal.id, notes = note_ids.len(), saved, "Deal engagements synced");
        Ok(Some(EngagementSyncResult {
            deal_id: deal.id,
            hubspot_deal_id: hubspot_deal_id.to_string(),
            engagements: saved,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(id: &str, properties: serde_json::Value) -> CrmObject {
        serde_json::from_value(json!({ "id": id, "properties": properties })).unwrap()
    }

    #[test]
    fn request_defaults_enable_every_phase() {
        let request: HubSpotSyncRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.sync_companies && request.sync_contacts && request.sync_deals);
        assert_eq!(request.deals_limit, 1000);

        let request: HubSpotSyncRequest =
            serde_json::from_value(json!({ "syncContacts": false, "companiesLimit": 5 })).unwrap();
        assert!(!request.sync_contacts);
        assert_eq!(request.companies_limit, 5);
    }

    #[test]
    fn deal_row_parses_amount_and_close_date() {
        let row = deal_row(&object(
            "9",
            json!({
                "dealname": "Renewal",
                "amount": "1250.50",
                "closedate": "2025-03-01T00:00:00.000Z",
                "dealstage": ""
            }),
        ));
        assert_eq!(row.amount.unwrap(), Some(1250.5));
        assert!(row.close_date.unwrap().is_some());
        assert_eq!(row.stage.unwrap(), None);
        assert_eq!(row.hubspot_deal_id.unwrap(), "9");
    }

    #[test]
    fn engagement_title_is_first_non_empty_line() {
        let row = engagement_row(
            Uuid::new_v4(),
            &object(
                "n1",
                json!({ "hs_note_body": "\n  Call recap \nDetails", "hs_timestamp": "1735689600000" }),
            ),
        );
        assert_eq!(row.title.unwrap().as_deref(), Some("Call recap"));
        assert_eq!(row.engagement_type.unwrap(), "NOTE");
        assert!(row.occurred_at.unwrap().is_some());
    }

    #[test]
    fn contact_email_is_lowercased() {
        let row = contact_row(&object("c1", json!({ "email": "Ana@Example.COM" })));
        assert_eq!(row.email.unwrap().as_deref(), Some("ana@example.com"));
    }
}
