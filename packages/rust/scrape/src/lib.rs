//! Admin-page scraping for settings that have no REST API.
//!
//! This crate provides:
//! - [`SessionProvider`]: where the browser session cookie comes from
//! - [`AdminPageClient`]: cookie-authenticated fetcher for server-rendered admin pages
//! - [`extract_permissions`] / [`missing_permissions`]: the global permissions page

pub mod global_permissions;
pub mod session;

pub use global_permissions::{
    AdminPageClient, GLOBAL_PERMISSIONS_PATH, GlobalPermission, extract_permissions,
    fetch_global_permissions, missing_permissions,
};
pub use session::{InteractiveSession, SessionProvider, StoredCookieSession, prompt_for_cookie};
