//! Core types and trait definitions for Tally.
//!
//! Tally ingests tabular uploads of arbitrary shape into a relational store,
//! profiles the resulting table, and exchanges that profile with an external
//! text-completion service to answer questions about the data.
//!
//! This crate is deliberately free of database and HTTP dependencies. Storage
//! backends implement the traits in [`store`]; everything else is pure logic.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod analyst;
pub mod error;
pub mod page;
pub mod profile;
pub mod store;
pub mod table;
pub mod translate;
pub mod upload;

pub use error::{Error, Rejection, Result};
