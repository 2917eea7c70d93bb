//! HubSpot association linking
//!
//! Fills `company_id` on contacts and deals from HubSpot's v4 association API. Only rows whose
//! `company_id` is still `NULL` are touched, so the pass is idempotent and a crashed run is
//! finished by the next one.

use serde::Serialize;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::connectors::HubSpotClient;
use crate::connectors::hubspot::{ASSOCIATION_BATCH_SIZE, ObjectType};
use crate::repositories::CrmRepository;

use super::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LinkStats {
    pub contacts_linked: u64,
    pub deals_linked: u64,
    /// Rows left unlinked: no association, or the company is not synced locally
    pub unresolved: u64,
}

pub struct AssociationLinker {
    client: HubSpotClient,
    crm: CrmRepository,
}

impl AssociationLinker {
    pub fn new(client: HubSpotClient, crm: CrmRepository) -> Self {
        Self { client, crm }
    }

    #[instrument(skip(self))]
    pub async fn link_associations(&self) -> Result<LinkStats, SyncError> {
        let mut stats = LinkStats::default();

        let contacts = self.crm.unlinked_contacts().await?;
        let (linked, unresolved) = self.link(ObjectType::Contacts, &contacts).await?;
        stats.contacts_linked = linked;
        stats.unresolved += unresolved;

        let deals = self.crm.unlinked_deals().await?;
        let (linked, unresolved) = self.link(ObjectType::Deals, &deals).await?;
        stats.deals_linked = linked;
        stats.unresolved += unresolved;

        info!(
            contacts_linked = stats.contacts_linked,
            deals_linked = stats.deals_linked,
            unresolved = stats.unresolved,
            "Association linking finished"
        );
        Ok(stats)
    }

    async fn link(
        &self,
        object: ObjectType,
        rows: &[(Uuid, String)],
    ) -> Result<(u64, u64), SyncError> {
        let mut linked = 0;
        let mut unresolved = 0;

        for batch in rows.chunks(ASSOCIATION_BATCH_SIZE) {
            let hubspot_ids: Vec<String> = batch.iter().map(|(_, hs)| hs.clone()).collect();
            let associations = self.client.company_associations(object, &hubspot_ids).await?;

            let mut company_hs_ids: Vec<String> =
                associations.values().flatten().cloned().collect();
            company_hs_ids.sort();
            company_hs_ids.dedup();
            let local = self.crm.company_ids_by_hubspot_id(&company_hs_ids).await?;

            for (row_id, hubspot_id) in batch {
                let company_id = associations
                    .get(hubspot_id)
                    .and_then(|targets| targets.iter().find_map(|t| local.get(t)));
                let Some(company_id) = company_id else {
                    unresolved += 1;
                    continue;
                };
                let updated = match object {
                    ObjectType::Contacts => self.crm.link_contact(*row_id, *company_id).await?,
                    _ => self.crm.link_deal(*row_id, *company_id).await?,
                };
                if updated {
                    linked += 1;
                }
            }
            debug!(object = object.as_str(), batch = batch.len(), linked, "Linked batch");
        }
        Ok((linked, unresolved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Contact, Deal};
    use crate::sync::hubspot::{company_row, contact_row, deal_row};
    use migration::{Migrator, MigratorTrait};
    use sea_orm::{Database, EntityTrait};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn object(id: &str) -> crate::connectors::hubspot::CrmObject {
        serde_json::from_value(json!({ "id": id, "properties": { "name": id } })).unwrap()
    }

    #[tokio::test]
    async fn links_resolvable_rows_and_is_idempotent() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let db = Arc::new(db);
        let crm = CrmRepository::new(db.clone());

        crm.upsert_companies(vec![company_row(&object("100"))])
            .await
            .unwrap();
        crm.upsert_contacts(vec![contact_row(&object("1")), contact_row(&object("2"))])
            .await
            .unwrap();
        crm.upsert_deals(vec![deal_row(&object("50"))]).await.unwrap();

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crm/v4/associations/contacts/companies/batch/read"))
            .respond_with(ResponseTemplate::new(207).set_body_json(json!({
                "results": [
                    { "from": { "id": "1" }, "to": [{ "toObjectId": 100 }] },
                    { "from": { "id": "2" }, "to": [{ "toObjectId": 999 }] }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/crm/v4/associations/deals/companies/batch/read"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "from": { "id": "50" }, "to": [{ "toObjectId": "100" }] }]
            })))
            .mount(&server)
            .await;

        let linker = AssociationLinker::new(
            HubSpotClient::new(server.uri(), Some("token".into())),
            crm.clone(),
        );
        let stats = linker.link_associations().await.unwrap();
        assert_eq!(
            stats,
            LinkStats {
                contacts_linked: 1,
                deals_linked: 1,
                unresolved: 1
            }
        );

        let linked: Vec<_> = Contact::find()
            .all(&*db)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.company_id.is_some())
            .map(|c| c.hubspot_contact_id)
            .collect();
        assert_eq!(linked, vec!["1".to_string()]);
        assert!(Deal::find().one(&*db).await.unwrap().unwrap().company_id.is_some());

        // second pass only revisits the unresolved contact
        let again = linker.link_associations().await.unwrap();
        assert_eq!(again.contacts_linked + again.deals_linked, 0);
        assert_eq!(again.unresolved, 1);
    }
}
