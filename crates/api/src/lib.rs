//! HTTP API: configuration, authentication, routing and response mapping
//! over the back-office workflows.

pub mod app;
pub mod authz;
pub mod config;
pub mod context;
pub mod middleware;
