//! World Bank Loans ELT Pipeline Library
//!
//! Extracts IBRD loan records from the World Bank finances API, stages them as
//! bronze/silver CSV artifacts in blob storage, loads the cleaned data into
//! PostgreSQL and runs three fixed analytical queries over it.
//!
//! # Modules
//!
//! - `analysis`: The three read-only aggregate queries.
//! - `blob_storage`: Artifact container over Azure, local or in-memory stores.
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `errors`: Error handling types.
//! - `extractor`: World Bank client and the extract step.
//! - `loader`: Bulk copy of the silver artifact into the destination table.
//! - `models`: Steps, silver records, query rows and run reports.
//! - `pipeline`: Step ordering, fan-out and failure propagation.
//! - `refresh_lock`: Single-writer guard for the table refresh.
//! - `schema_manager`: Destination table DDL.
//! - `transformer`: Bronze to silver cleaning and derivation.

pub mod analysis;
pub mod blob_storage;
pub mod config;
pub mod db;
pub mod errors;
pub mod extractor;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod refresh_lock;
pub mod schema_manager;
pub mod transformer;
