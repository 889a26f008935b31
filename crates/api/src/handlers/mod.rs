//! Request handlers, one module per resource.

pub mod evaluations;
pub mod health;
pub mod models;
pub mod storage;
