//! HubSpot CRM client
//!
//! Object listing via CRM v3 (cursor paging with `after`), association reads via CRM v4.

use std::collections::HashMap;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::trait_::{ProviderError, http_client, read_json};

const PROVIDER: &str = "hubspot";

/// HubSpot caps list pages at 100 objects
pub const MAX_PAGE_SIZE: u32 = 100;
/// Batch association reads accept at most 100 inputs
pub const ASSOCIATION_BATCH_SIZE: usize = 100;

pub const COMPANY_PROPERTIES: &[&str] = &["name", "domain", "website", "phone", "industry"];
pub const CONTACT_PROPERTIES: &[&str] = &["email", "firstname", "lastname", "phone", "company"];
pub const DEAL_PROPERTIES: &[&str] = &["dealname", "amount", "dealstage", "pipeline", "closedate"];
pub const NOTE_PROPERTIES: &[&str] = &["hs_note_body", "hs_timestamp", "hs_note_type"];

/// CRM object families this service reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Companies,
    Contacts,
    Deals,
    Notes,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Companies => "companies",
            ObjectType::Contacts => "contacts",
            ObjectType::Deals => "deals",
            ObjectType::Notes => "notes",
        }
    }
}

/// One CRM object with the requested properties
#[derive(Debug, Clone, Deserialize)]
pub struct CrmObject {
    pub id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl CrmObject {
    /// Non-empty string property
    pub fn prop(&self, name: &str) -> Option<String> {
        self.properties
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn properties_json(&self) -> Value {
        Value::Object(self.properties.clone())
    }
}

#[derive(Debug, Deserialize)]
struct NextPage {
    after: String,
}

#[derive(Debug, Deserialize)]
struct Paging {
    next: Option<NextPage>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    results: Vec<CrmObject>,
    paging: Option<Paging>,
}

/// Page of CRM objects plus the cursor for the next one
#[derive(Debug, Clone)]
pub struct ObjectPage {
    pub results: Vec<CrmObject>,
    pub next_after: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssociationTarget {
    to_object_id: Value,
}

#[derive(Debug, Deserialize)]
struct AssociationFrom {
    id: Value,
}

#[derive(Debug, Deserialize)]
struct AssociationResult {
    from: AssociationFrom,
    #[serde(default)]
    to: Vec<AssociationTarget>,
}

#[derive(Debug, Deserialize)]
struct AssociationBatchResponse {
    #[serde(default)]
    results: Vec<AssociationResult>,
}

#[derive(Debug, Deserialize)]
struct AssociationListResponse {
    #[serde(default)]
    results: Vec<AssociationTarget>,
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize)]
struct BatchReadResponse {
    #[serde(default)]
    results: Vec<CrmObject>,
}

/// HubSpot ids arrive as numbers in v4 and strings in v3
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// HubSpot private-app client
#[derive(Debug, Clone)]
pub struct HubSpotClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HubSpotClient {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_token.is_some()
    }

    fn token(&self) -> Result<&str, ProviderError> {
        self.access_token
            .as_deref()
            .ok_or_else(|| ProviderError::not_configured(PROVIDER, "HUBSPOT_ACCESS_TOKEN is not set"))
    }

    /// Lists one page of objects with the given properties.
    pub async fn list_objects(
        &self,
        object: ObjectType,
        properties: &[&str],
        limit: u32,
        after: Option<&str>,
    ) -> Result<ObjectPage, ProviderError> {
        let token = self.token()?;
        let url = format!("{}/crm/v3/objects/{}", self.base_url, object.as_str());

        let mut query = vec![
            ("limit", limit.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("properties", properties.join(",")),
        ];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let response = self
            .http
            .get(&url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        let body: ListResponse = read_json(PROVIDER, response).await?;
        Ok(ObjectPage {
            results: body.results,
            next_after: body.paging.and_then(|p| p.next).map(|n| n.after),
        })
    }

    /// Reads company associations for up to [`ASSOCIATION_BATCH_SIZE`] contacts or deals.
    ///
    /// Returns HubSpot object id -> associated HubSpot company ids.
    pub async fn company_associations(
        &self,
        from: ObjectType,
        ids: &[String],
    ) -> Result<HashMap<String, Vec<String>>, ProviderError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let token = self.token()?;
        let url = format!(
            "{}/crm/v4/associations/{}/companies/batch/read",
            self.base_url,
            from.as_str()
        );
        let inputs: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&json!({ "inputs": inputs }))
            .send()
            .await
            .map_err(|e| ProviderError::network(PROVIDER, e))?;

        // 207 Multi-Status is returned when some inputs have no associations
        let body: AssociationBatchResponse = read_json(PROVIDER, response).await?;
        let mut out = HashMap::new();
        for result in body.results {
            let Some(from_id) = id_string(&result.from.id) else {
                continue;
            };
            let targets: Vec<String> = result
                .to
                .iter()
                .filter_map(|t| id_string(&t.to_object_id))
                .collect();
            out.insert(from_id, targets);
        }
        Ok(out)
    }

    /// Ids of all notes associated with a deal.
    pub async fn deal_note_ids(&self, deal_id: &str) -> Result<Vec<String>, ProviderError> {
        let token = self.token()?;
        let url = format!(
            "{}/crm/v4/objects/deals/{}/associations/notes",
            self.base_url, deal_id
        );

        let mut ids = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let mut request = self
                .http
                .get(&url)
                .bearer_auth(token)
                .query(&[("limit", "500")]);
            if let Some(after) = &after {
                request = request.query(&[("after", after.as_str())]);
            }
            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::network(PROVIDER, e))?;
            let body: AssociationListResponse = read_json(PROVIDER, response).await?;

            ids.extend(body.results.iter().filter_map(|t| id_string(&t.to_object_id)));
            match body.paging.and_then(|p| p.next) {
                Some(next) => after = Some(next.after),
                None => break,
            }
        }
        Ok(ids)
    }

    /// Batch-reads objects by id.
    pub async fn batch_read(
        &self,
        object: ObjectType,
        ids: &[String],
        properties: &[&str],
    ) -> Result<Vec<CrmObject>, ProviderError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let token = self.token()?;
        let url = format!(
            "{}/crm/v3/objects/{}/batch/read",
            self.base_url,
            object.as_str()
        );

        let mut objects = Vec::with_capacity(ids.len());
        for batch in ids.chunks(ASSOCIATION_BATCH_SIZE) {
            let inputs: Vec<Value> = batch.iter().map(|id| json!({ "id": id })).collect();
            let response = self
                .http
                .post(&url)
                .bearer_auth(token)
                .json(&json!({ "properties": properties, "inputs": inputs }))
                .send()
                .await
                .map_err(|e| ProviderError::network(PROVIDER, e))?;
            let body: BatchReadResponse = read_json(PROVIDER, response).await?;
            objects.extend(body.results);
        }
        Ok(objects)
    }
}
