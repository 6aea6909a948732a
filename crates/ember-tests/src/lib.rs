//! # ember-tests
//!
//! Integration tests for the Ember node.
//!
//! This crate provides cross-crate testing including:
//! - Header validation scenarios over built chains
//! - Difficulty computation across hardfork epochs
//! - Two-node server scenarios over loopback sockets

pub mod generators;


#[cfg(test)]
mod network_tests;

pub use generators::*;
