//! Strata Core
//!
//! Core library for a declarative resource reconciler: parse a configuration,
//! build its dependency graph, diff it against recorded state, and execute
//! the resulting plan through providers.

pub mod differ;
pub mod error;
pub mod executor;
pub mod graph;
pub mod parser;
pub mod plan;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod store;
