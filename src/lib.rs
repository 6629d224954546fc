//! db-hub core library
//!
//! Backend data-access layer for browsing and querying heterogeneous
//! databases (MySQL, MongoDB, Elasticsearch) through one interface:
//! connection lifecycle with optional SSH tunneling, a searchable schema
//! index per database, and a query gateway that gates destructive
//! operations behind explicit confirmation.

pub mod config;
pub mod db;
pub mod error;
pub mod indexer;
pub mod models;
pub mod query;

pub use config::Config;
pub use db::{ConnectionManager, ConnectionRegistry};
pub use error::{CoreError, CoreResult};
pub use indexer::SchemaIndexer;
pub use query::QueryGateway;
