use std::fmt::{Display, Formatter};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::controller::{FormEngine, FormError, FormOptions, FormResult};
use super::value::FormState;

/// Name of a field, as produced by `#[derive(FormModel)]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FieldKey(&'static str);

impl FieldKey {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl AsRef<str> for FieldKey {
    fn as_ref(&self) -> &str {
        self.0
    }
}

impl Display for FieldKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

/// A struct whose fields map one-to-one onto form fields.
///
/// Implemented by `#[derive(FormModel)]`, which also generates a
/// `<Model>Fields` type with one `const fn` per field returning its
/// [`FieldKey`].
pub trait FormModel {
    type Fields;

    fn fields() -> Self::Fields;

    fn field_names() -> &'static [&'static str];
}

impl FormEngine {
    /// Builds an engine whose initial state is `model` serialized field by
    /// field.
    pub fn from_model<M>(model: &M) -> FormResult<Self>
    where
        M: Serialize,
    {
        Self::from_model_with_options(model, FormOptions::default())
    }

    pub fn from_model_with_options<M>(model: &M, options: FormOptions) -> FormResult<Self>
    where
        M: Serialize,
    {
        let json = serde_json::to_value(model).map_err(|error| FormError::Serialization(error.to_string()))?;
        let actual = json_kind(&json);
        let state = FormState::from_json(json)
            .ok_or_else(|| FormError::Serialization(format!("expected a struct or map, got {actual}")))?;
        Ok(Self::with_options(state, options))
    }

    /// Current state deserialized into `M`.
    pub fn state_as<M>(&self) -> FormResult<M>
    where
        M: DeserializeOwned,
    {
        state_into(self.get_state()?)
    }
}

pub(super) fn state_into<M>(state: FormState) -> FormResult<M>
where
    M: DeserializeOwned,
{
    serde_json::from_value(state.to_json()).map_err(|error| FormError::Serialization(error.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
