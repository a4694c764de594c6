// src/tests/mod.rs
//! End-to-end tests for the dispatch engine

mod lifecycle_tests;
