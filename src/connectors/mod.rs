//! # Provider Clients
//!
//! Thin reqwest clients for every upstream the service talks to. Base URLs are configurable so
//! tests can point them at a mock server.

pub mod gmail;
pub mod google_auth;
pub mod google_calendar;
pub mod hubspot;
pub mod n8n;
pub mod openai;
pub mod periskope;
pub mod slack;
pub mod trait_;

pub use gmail::GmailClient;
pub use google_auth::GoogleTokenClient;
pub use google_calendar::CalendarClient;
pub use hubspot::HubSpotClient;
pub use n8n::N8nClient;
pub use openai::{EmbeddingProvider, OpenAiEmbedder};
pub use periskope::PeriskopeClient;
pub use slack::SlackClient;
pub use trait_::ProviderError;
