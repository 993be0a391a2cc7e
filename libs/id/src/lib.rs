//! # edgealloc-id
//!
//! Typed identifiers used across the optimizer.
//!
//! Two families of IDs exist:
//!
//! - **Issued keys** come from external systems and are carried verbatim:
//!   device IDs are opaque strings chosen by the device frontend, cluster and
//!   application-requirement IDs are integers issued by the cluster-management
//!   platform. These are defined with [`define_str_key!`] and
//!   [`define_int_key!`].
//! - **Generated IDs** are minted by the optimizer itself and use a prefixed
//!   ULID format `{prefix}_{ulid}` (e.g. `cyc_01HV4Z2WQXKJNM8GPQY6VBKC3D`),
//!   defined with [`define_id!`].
//!
//! Keeping them typed prevents passing a cluster ID where a requirement ID is
//! expected, which is easy to do when both are plain integers on the wire.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

#[doc(hidden)]
pub use ulid::Ulid;
