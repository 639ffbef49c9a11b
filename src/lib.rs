//! Subject Enrichment & Risk-Scoring Library
//!
//! Takes a sparse identity record (email, phone, display name), queries
//! independent intelligence sources concurrently, correlates the accounts they
//! report, and scores the result.
//!
//! # Modules
//!
//! - `adapters`: Source adapters (breach directory, social existence, phone, domain).
//! - `cache_validator`: Checksummed response cache.
//! - `circuit_breaker`: Per-adapter circuit breaker construction.
//! - `config`: Configuration management.
//! - `correlation`: Groups discovered accounts into clusters.
//! - `db`: Database connection pool and migrations.
//! - `db_storage`: Postgres enrichment store.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers.
//! - `models`: Core data models.
//! - `orchestrator`: Runs enrichment passes.
//! - `registry`: Active adapter set and call policy.
//! - `scoring`: Risk scoring.
//! - `single_flight`: In-process keyed test-and-set guard.
//! - `store`: Enrichment store trait and in-memory store.
//! - `validation`: Email, username and phone checks.

pub mod adapters;
pub mod cache_validator;
pub mod circuit_breaker;
pub mod config;
pub mod correlation;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod scoring;
pub mod single_flight;
pub mod store;
pub mod validation;
