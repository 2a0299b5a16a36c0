//! Credit Report Analysis API Library
//!
//! Turns the text of a CIBIL credit report into a chain of structured
//! analyses (credit analysis, risk, rating, loan eligibility, underwriting)
//! produced by a hosted model and validated against a schema before use.
//!
//! # Modules
//!
//! - `api`: Router and middleware stack.
//! - `core`: Domain-layer re-exports.
//! - `integrations`: External service re-exports.
//! - `config`: Configuration management.
//! - `contracts`: Response schemas for each model step.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Report summary persistence.
//! - `errors`: Error handling types.
//! - `finance`: Deterministic loan arithmetic.
//! - `handlers`: HTTP request handlers.
//! - `identity`: Session verification against the identity service.
//! - `model_client`: Inference service boundary.
//! - `models`: Core data models.
//! - `pipeline`: The step-by-step analysis pipeline.
//! - `prompts`: Instruction templates.
//! - `schema`: Structured-output validation.
//! - `validation`: PAN, mobile number and loan parameter checks.

pub mod api;
pub mod core;
pub mod integrations;

pub mod config;
pub mod contracts;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod finance;
pub mod handlers;
pub mod identity;
pub mod model_client;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod schema;
pub mod validation;
