//! Client-side data access: a TTL response cache with in-flight
//! deduplication, and a request pipeline that attaches credentials and
//! renews them transparently when the server rejects them.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod infra;
pub mod pipeline;

pub use client::{ApiClient, ApiClientBuilder, ClientConfig};
pub use error::ApiError;
