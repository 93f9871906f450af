//! Status board: outage lifecycle and component health aggregation.
//!
//! Probes submit health reports, people declare and manage outages, and
//! component status is derived on every read from active outages and probe
//! heartbeats. The monitored-component catalog is a YAML file reloaded
//! without restart.

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod db;
pub mod outage;
pub mod status;
pub mod web;
