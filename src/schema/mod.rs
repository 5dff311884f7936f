//! Document schema validation

pub mod validator;

pub use validator::{DocumentValidator, SchemaViolation, ValidationError};
