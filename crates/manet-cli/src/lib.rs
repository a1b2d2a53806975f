//! # manet-cli
//!
//! Command-line interface for the manet ad-hoc network simulator.
//!
//! ## Commands
//!
//! - `manet router`: Run one router and its devices over TCP until Ctrl-C
//! - `manet simulate`: Run routers and devices in-process and print the tables
//! - `manet routers`: List the routers in the shared registry
//! - `manet config`: Show the resolved configuration

pub mod commands;

pub use commands::Cli;
