//! Query side of the order pipeline.
//!
//! Runs the query consumer on its own task, materializing the orders topic
//! into an in-memory read store, and serves that store over HTTP. Reads are
//! eventually consistent with the log.

#![forbid(unsafe_code)]

pub mod config;
pub mod routes;

pub use config::Config;
pub use routes::build_router;
