//! Form state and validation engine.
//!
//! A [`form::FormEngine`] owns a map of field values, evaluates declarative
//! [`form::ValidationRule`]s against them and notifies per-field observers of
//! value, error and validation-status changes. Rendering is left to the
//! caller: bindings subscribe to the engine and write back through it.

pub mod form;
pub mod prelude;
