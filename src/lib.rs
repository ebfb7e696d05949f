//! Collar telemetry pipeline: decoding, alert rules, offline detection
//! and buffered persistence for tracked livestock.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod geo;
pub mod kafka;
pub mod models;
pub mod mqtt;
pub mod processor;
pub mod store;
