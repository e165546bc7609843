//! Payment and order lifecycle backend.
//!
//! Orders are paid through pluggable provider adapters; confirmations arrive
//! by webhook, browser return or polling and are reconciled through one
//! ordering rule; refunds and receipts are operator actions.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod workers;
