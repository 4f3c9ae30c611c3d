//! Integration tests for the retrieval core
//!
//! These run against temporary directories and an in-process deterministic
//! embedder; no network access is needed.

pub mod support;
