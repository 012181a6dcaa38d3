//! Monthly transaction CSV to star-schema warehouse ETL.

pub mod config;
pub mod db;
pub mod dimensions;
pub mod error;
pub mod facts;
pub mod ingestion;
pub mod normalize;
pub mod period;
pub mod pipeline;
pub mod record;
pub mod staging;
pub mod validation;
pub mod warehouse;
