pub mod api_client;
pub mod cache;
pub mod config;
pub mod contact;
pub mod documents;
pub mod errors;
pub mod models;
pub mod poller;
