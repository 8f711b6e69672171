//! Syscontext - link-graph resolution for a configuration management database.
//!
//! Applications, their configuration items, installations and running sessions
//! are stored as flat records. Hierarchy and dependencies are separate link
//! records. This crate resolves those links back into:
//!
//! - flattened configuration maps (`app.ui.theme -> dark`)
//! - transitive application dependency graphs
//! - per-session property overlays on top of static configuration
//!
//! Start with [`context::SystemContext`], constructed from any
//! [`storage::SystemStore`] implementation and a [`config::ContextConfig`].

#![forbid(unsafe_code)]

pub mod config;
pub mod context;
pub mod domain;
pub mod error;
pub mod graph;
pub mod model;
pub mod session;
pub mod storage;

pub use context::SystemContext;
pub use error::{Error, Result};
