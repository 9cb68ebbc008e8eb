pub mod cli;
pub mod commands;
pub mod config;
pub mod csp;
pub mod provisioning;
