//! services/client/src/lib.rs
//!
//! Library half of the quiz client: adapters for the identity provider and
//! the quiz backend, plus the session and quiz controllers built on the
//! ports in `quiz_core`.

pub mod adapters;
pub mod app;
pub mod config;
pub mod error;

#[cfg(test)]
pub(crate) mod testing;
