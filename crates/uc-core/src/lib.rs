pub mod api_error;
pub mod auth;
pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod matching;
pub mod metrics;
pub mod rate_limit;
pub mod server;
pub mod source;
pub mod store;
