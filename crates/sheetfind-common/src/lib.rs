//! Common utilities for sheetfind
//!
//! This crate provides the error type shared by the store, ingestion and CLI crates.

pub mod error;

pub use error::{Result, SheetFindError};
