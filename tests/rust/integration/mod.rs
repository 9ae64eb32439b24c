//! Integration tests - Query text through parsing, typing, expansion and reduction
//!
//! These tests verify that the front end and the expansion passes work
//! together on a small shop model.

mod config_tests;
mod expansion_tests;
mod fixtures;
mod include_tests;
