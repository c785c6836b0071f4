//! REST plumbing shared by every artifact pipeline.
//!
//! This crate provides:
//! - [`ApiClient`]: Basic-auth client bound to one instance, with bounded retry
//! - [`fetch_all`] / [`PageSpec`]: offset pagination over both API conventions

pub mod http;
pub mod paginate;

pub use http::ApiClient;
pub use paginate::{PageEnd, PageSpec, fetch_all};
