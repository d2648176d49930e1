//! Integration tests for rwa-desk.
//!
//! These tests drive the full desk over in-memory backends:
//! - Order lifecycle scenarios (create, approve, reject, cancel)
//! - Reconciliation of ambiguous submissions
//! - Single-flight behaviour under concurrent intents
//! - Order store refresh semantics

pub mod common;
