//! # CRM Sync Library
//!
//! Multi-tenant sync service: pulls HubSpot, Gmail, Calendar, WhatsApp and Slack data into
//! Postgres, keeps an embedding queue drained, and exposes the HTTP surface for both.

pub mod auth;
pub mod config;
pub mod connectors;
pub mod crypto;
pub mod cursor;
pub mod db;
pub mod embedding_executor;
pub mod error;
pub mod handlers;
pub mod models;
pub mod partner_billing;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod telemetry;
pub mod token_refresh;
pub mod webhook_verification;
pub use migration;
