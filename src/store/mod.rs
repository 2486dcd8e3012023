//! In-memory storage for built cap table histories.
//!
//! This module provides:
//! - A bounded, content-addressed history cache shared by request handlers

pub mod history_store;

pub use history_store::{HistoryStore, StoredHistory};
