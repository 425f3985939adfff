//! services/api/src/lib.rs
//!
//! The EduLab dashboard service: adapters for the hosted database and the
//! local mode, configuration, and the web layer.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
