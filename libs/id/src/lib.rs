//! # tfo-id
//!
//! Typed identifiers for objects that live on the remote Terraform platform.
//!
//! ## Design Principles
//!
//! - Remote IDs are opaque and platform-generated; names are user-controlled labels
//! - All IDs have a canonical string representation with strict parsing
//! - IDs are typed to prevent passing a run ID where a workspace ID is expected
//!
//! ## ID Format
//!
//! The platform uses a prefixed format: `{prefix}-{suffix}`
//!
//! Examples:
//! - `ws-4C8wWWbBLf3a6Ltu`
//! - `apool-yoGUFz5zcRMMz53i`
//! - `run-CZcmD7eagjhyX0vN`
//!
//! The suffix is alphanumeric. IDs minted locally (the in-memory backend) use a
//! ULID suffix so they sort by creation time.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
