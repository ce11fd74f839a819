//! Resumable batch enrichment
//!
//! This library walks collections of nutrition records in key order and
//! applies expensive, rate-limited Workers AI transformations to the records
//! that still need them. Jobs make forward progress across repeated,
//! time-boxed invocations by persisting a cursor, a lock and progress
//! counters per job name.

pub mod app_state;
pub mod config;
pub mod db;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod services;
