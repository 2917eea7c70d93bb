//! Incremental sync across all users with active Google integrations

use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::repositories::IntegrationRepository;
use crate::repositories::integration::{PLATFORM_GMAIL, PLATFORM_GOOGLE_CALENDAR};
use crate::token_refresh::TokenRefresher;

use super::SyncError;
use super::calendar::CalendarSync;
use super::gmail::GmailSync;

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorReport {
    pub total_users: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub gmail_syncs: u64,
    pub calendar_syncs: u64,
    pub errors: Vec<String>,
}

pub struct IncrementalOrchestrator {
    integrations: IntegrationRepository,
    refresher: TokenRefresher,
    gmail: GmailSync,
    calendar: CalendarSync,
    user_delay: Duration,
}

impl IncrementalOrchestrator {
    pub fn new(
        integrations: IntegrationRepository,
        refresher: TokenRefresher,
        gmail: GmailSync,
        calendar: CalendarSync,
        user_delay: Duration,
    ) -> Self {
        Self {
            integrations,
            refresher,
            gmail,
            calendar,
            user_delay,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<OrchestratorReport, SyncError> {
        let users = self
            .integrations
            .active_user_ids(&[PLATFORM_GMAIL, PLATFORM_GOOGLE_CALENDAR])
            .await?;
        let mut report = OrchestratorReport {
            total_users: users.len() as u64,
            ..Default::default()
        };
        info!(users = users.len(), "Starting incremental sync");

        for (index, user_id) in users.iter().enumerate() {
            if index > 0 && !self.user_delay.is_zero() {
                sleep(self.user_delay).await;
            }
            let errors = self.sync_user(*user_id, &mut report).await;
            if errors.is_empty() {
                report.successful_syncs += 1;
            } else {
                report.failed_syncs += 1;
                report
                    .errors
                    .extend(errors.into_iter().map(|e| format!("user {}: {}", user_id, e)));
            }
        }

        info!(
            successful = report.successful_syncs,
            failed = report.failed_syncs,
            "Incremental sync finished"
        );
        Ok(report)
    }

    /// Runs Gmail then Calendar for one user; returns the errors hit.
    async fn sync_user(&self, user_id: Uuid, report: &mut OrchestratorReport) -> Vec<String> {
        let mut errors = Vec::new();

        match self.gmail_pass(user_id).await {
            Ok(Some(errs)) if errs.is_empty() => report.gmail_syncs += 1,
            Ok(Some(errs)) => errors.extend(errs.into_iter().map(|e| format!("gmail: {}", e))),
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Gmail incremental sync failed");
                errors.push(format!("gmail: {}", e));
            }
        }

        match self.calendar_pass(user_id).await {
            Ok(Some(errs)) if errs.is_empty() => report.calendar_syncs += 1,
            Ok(Some(errs)) => errors.extend(errs.into_iter().map(|e| format!("calendar: {}", e))),
            Ok(None) => {}
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Calendar incremental sync failed");
                errors.push(format!("calendar: {}", e));
            }
        }
        errors
    }

    /// `None` when the user has no active Gmail integration
    async fn gmail_pass(&self, user_id: Uuid) -> Result<Option<Vec<String>>, SyncError> {
        let Some(integration) = self.integrations.find_active(user_id, PLATFORM_GMAIL).await?
        else {
            return Ok(None);
        };
        let token = self.refresher.ensure_fresh(integration).await?;
        let report = self.gmail.incremental(user_id, &token, true).await?;
        Ok(Some(report.outcome.errors))
    }

    async fn calendar_pass(&self, user_id: Uuid) -> Result<Option<Vec<String>>, SyncError> {
        let Some(integration) = self
            .integrations
            .find_active(user_id, PLATFORM_GOOGLE_CALENDAR)
            .await?
        else {
            return Ok(None);
        };
        let token = self.refresher.ensure_fresh(integration).await?;
        let report = self.calendar.incremental(user_id, &token, true).await?;
        Ok(Some(report.errors))
    }
}
