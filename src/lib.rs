//! leadsource - autonomous lead sourcing for multi-tenant CRMs.
//!
//! A per-user, interval-scheduled engine that searches an external listings
//! provider, filters dead links and duplicates, gates surviving candidates
//! through a model evaluation, writes approvals as pending review proposals,
//! and rewrites its own search query from run analytics when output degrades.

pub mod analytics;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod evaluate;
pub mod heal;
pub mod llm;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod search;
pub mod sourcing;
pub mod validate;
