//! Core value types shared across the crate.

mod variable_type;

pub use variable_type::VariableType;
