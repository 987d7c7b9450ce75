//! Rubric scoring engine for judged marching-drill competitions.
//!
//! A [`session::JudgeSession`] holds one judge's active form, event and team and keeps the
//! score sheet persisted between runs until it is submitted.

pub mod error;
pub mod models;
pub mod services;
pub mod session;

pub use error::{StoreError, SubmissionError, TransportError, ValidationError};
pub use session::JudgeSession;
