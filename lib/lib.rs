pub mod cli;
pub mod config;
pub mod db;
pub mod feed;
pub mod ingest;
pub mod query;
pub mod server;
pub mod state;
pub mod store;
pub mod validation;
pub mod vrp;
