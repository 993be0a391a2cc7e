//! edgealloc optimizer library.
//!
//! This crate primarily ships the `optimizer` binary, but exposes its library
//! surface for integration testing and reuse.

pub mod check;
pub mod commit;
pub mod config;
pub mod cycle;
pub mod db;
pub mod model;
pub mod placement;
pub mod platform;
pub mod report;
pub mod scaling;
pub mod worker;
