//! # Data Models
//!
//! SeaORM entities for the relational store plus a few shared response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod calendar_event;
pub mod company;
pub mod contact;
pub mod conversation;
pub mod deal;
pub mod deal_engagement;
pub mod email;
pub mod embedding_queue;
pub mod message;
pub mod solution_handbook;
pub mod sync_run;
pub mod user;
pub mod user_integration;

pub use calendar_event::Entity as CalendarEvent;
pub use company::Entity as Company;
pub use contact::Entity as Contact;
pub use conversation::Entity as Conversation;
pub use deal::Entity as Deal;
pub use deal_engagement::Entity as DealEngagement;
pub use email::Entity as Email;
pub use embedding_queue::Entity as EmbeddingQueue;
pub use message::Entity as Message;
pub use solution_handbook::Entity as SolutionHandbook;
pub use sync_run::Entity as SyncRun;
pub use user::Entity as User;
pub use user_integration::Entity as UserIntegration;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "crm-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
