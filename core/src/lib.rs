//! Resilient data access for the recipe schema.
//!
//! Application code talks to [`Client`]: `client.from("recipes")` returns a
//! chainable [`TableHandle`] that is sent to the remote backend with bounded
//! retries and, when the backend is unreachable or missing a table, answered
//! from an in-memory fallback dataset with the same row shape.

pub mod cache;
pub mod classify;
pub mod client;
pub mod credentials;
pub mod error;
pub mod fallback;
pub mod handle;
pub mod models;
pub mod postgrest;
pub mod query;
pub mod remote;
pub mod retry;
pub mod service;

pub use client::{Client, ClientConfig, Degradation, SourceStatus};
pub use error::{ClassifiedError, ConfigError, ErrorKind, Result};
pub use handle::{SingleHandle, TableHandle};
pub use models::Table;
pub use query::Row;
pub use retry::RetryOptions;
pub use service::RecipeService;
