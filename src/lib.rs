//! Inkwell - book catalog, blog and social follow API
//!
//! This library provides the storage, services and HTTP layer of the
//! Inkwell server. The binary in `main.rs` only wires configuration,
//! logging and the listener around [`api::build_router`].

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
