//! Database module: row models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: row slices returned by repositories that have no domain type.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! The repository API is re-exported at `pressline::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{PostFilter, StaticContent, TaskRow};
