//! regulens-backend
//! A compliance-and-risk monitoring backend: scheduled regulatory scraping,
//! pattern recognition over decisions and activity, a feedback-driven
//! learning loop, and the domain surfaces (decisions, knowledge, memory,
//! transactions, fraud rules) those feed.

pub mod auth;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod feedback;
pub mod http_client;
pub mod logging;
pub mod middleware;
pub mod pattern;
pub mod registry;
pub mod regulatory;
