//! Kernel utilities shared across the bus crates and binaries.
//! Keep this crate lightweight; it re-exports ergonomic helpers for IDs and config loading.
//!
//! ## ID generation
//! ```rust
//! # use evbus_kernel::safe_nanoid;
//! let id = safe_nanoid!();
//! assert_eq!(id.len(), 12);
//! ```
//!
//! ## Config loading
//! ```rust,no_run
//! use evbus_kernel::config::load_config;
//! use evbus_kernel::domain::config::AppConfig;
//!
//! let cfg: AppConfig = load_config(Some("evbus.toml")).unwrap_or_default();
//! # let _ = cfg;
//! ```
pub mod config;

pub use evbus_domain as domain;
pub use evbus_domain::{SAFE_ALPHABET, nanoid, safe_nanoid};
