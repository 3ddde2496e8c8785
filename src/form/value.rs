use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt::{Display, Formatter};

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Dynamic value held by a single form field.
///
/// `Undefined` marks a field that has never been given a value, which the
/// required and bound checks treat differently from an explicit `Null`.
/// Both serialize as JSON `null`.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(Decimal),
    /// A finite number that `Decimal` cannot hold exactly, such as `1e30`
    /// or `1e-30`.
    Float(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, FieldValue::Undefined)
    }

    /// `Undefined` or `Null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, FieldValue::Undefined | FieldValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Undefined => "undefined",
            FieldValue::Null => "null",
            FieldValue::Bool(_) => "bool",
            FieldValue::Number(_) | FieldValue::Float(_) => "number",
            FieldValue::Text(_) => "text",
            FieldValue::List(_) => "list",
            FieldValue::Map(_) => "map",
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            FieldValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(number) => number.to_f64(),
            FieldValue::Float(float) => Some(*float),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Undefined | FieldValue::Null => serde_json::Value::Null,
            FieldValue::Bool(value) => serde_json::Value::Bool(*value),
            FieldValue::Number(number) => decimal_to_json(*number),
            FieldValue::Float(float) => float_to_json(*float),
            FieldValue::Text(text) => serde_json::Value::String(text.clone()),
            FieldValue::List(items) => {
                serde_json::Value::Array(items.iter().map(FieldValue::to_json).collect())
            }
            FieldValue::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }
}

fn decimal_to_json(number: Decimal) -> serde_json::Value {
    if let Some(integer) = exact_integer(number) {
        return serde_json::Value::from(integer);
    }
    number
        .to_f64()
        .and_then(serde_json::Number::from_f64)
        .map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn float_to_json(float: f64) -> serde_json::Value {
    serde_json::Number::from_f64(float).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// `Number` when `Decimal` holds `float` exactly, `Float` otherwise.
/// Non-finite input has no JSON form and becomes `Null`.
fn number_from_f64(float: f64) -> FieldValue {
    if !float.is_finite() {
        return FieldValue::Null;
    }
    Decimal::from_f64(float)
        .filter(|number| number.to_f64() == Some(float))
        .map_or(FieldValue::Float(float), FieldValue::Number)
}

fn exact_integer(number: Decimal) -> Option<i64> {
    if number.fract().is_zero() {
        number.to_i64()
    } else {
        None
    }
}

fn number_from_json(number: &serde_json::Number) -> FieldValue {
    if let Some(integer) = number.as_i64() {
        return FieldValue::Number(Decimal::from(integer));
    }
    if let Some(unsigned) = number.as_u64() {
        return FieldValue::Number(Decimal::from(unsigned));
    }
    number.as_f64().map_or(FieldValue::Null, number_from_f64)
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Undefined => f.write_str("undefined"),
            FieldValue::Null => f.write_str("null"),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Number(number) => write!(f, "{}", number.normalize()),
            FieldValue::Float(float) => write!(f, "{float}"),
            FieldValue::Text(text) => f.write_str(text),
            FieldValue::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            FieldValue::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Undefined | FieldValue::Null => serializer.serialize_none(),
            FieldValue::Bool(value) => serializer.serialize_bool(*value),
            FieldValue::Number(number) => {
                match exact_integer(*number) {
                    Some(integer) => serializer.serialize_i64(integer),
                    None => serializer.serialize_f64(number.to_f64().unwrap_or(f64::NAN)),
                }
            }
            FieldValue::Float(float) => serializer.serialize_f64(*float),
            FieldValue::Text(text) => serializer.serialize_str(text),
            FieldValue::List(items) => serializer.collect_seq(items),
            FieldValue::Map(entries) => serializer.collect_map(entries),
        }
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        serde_json::Value::deserialize(deserializer).map(FieldValue::from)
    }
}

// =============================================================================
// From implementations
// =============================================================================

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(value) => FieldValue::Bool(value),
            serde_json::Value::Number(number) => number_from_json(&number),
            serde_json::Value::String(text) => FieldValue::Text(text),
            serde_json::Value::Array(items) => {
                FieldValue::List(items.into_iter().map(FieldValue::from).collect())
            }
            serde_json::Value::Object(entries) => FieldValue::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, FieldValue::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Text(value.clone())
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Number(value)
    }
}

macro_rules! integer_field_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::Number(Decimal::from(value))
                }
            }
        )*
    };
}

integer_field_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        number_from_f64(value)
    }
}

impl<T> From<Option<T>> for FieldValue
where
    T: Into<FieldValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Undefined, Into::into)
    }
}

impl<T> From<Vec<T>> for FieldValue
where
    T: Into<FieldValue>,
{
    fn from(items: Vec<T>) -> Self {
        FieldValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, FieldValue>> for FieldValue {
    fn from(entries: BTreeMap<String, FieldValue>) -> Self {
        FieldValue::Map(entries)
    }
}

/// Field name to value mapping owned by a [`FormEngine`](super::FormEngine).
///
/// Also used as the partial patch accepted by
/// [`set_fields_value`](super::FormEngine::set_fields_value).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormState(BTreeMap<String, FieldValue>);

impl FormState {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// Current value of `field`, `Undefined` when absent.
    pub fn value(&self, field: &str) -> FieldValue {
        self.0.get(field).cloned().unwrap_or_default()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<FieldValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.0.remove(field)
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, FieldValue> {
        self.0.iter()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.0
                .iter()
                .map(|(key, value)| (key.clone(), value.to_json()))
                .collect(),
        )
    }

    /// Builds a state from a JSON object. Returns `None` for any other JSON
    /// shape.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Object(entries) => Some(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, FieldValue::from(value)))
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for FormState
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for FormState
where
    K: Into<String>,
    V: Into<FieldValue>,
{
    fn from(entries: [(K, V); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for FormState {
    type Item = (String, FieldValue);
    type IntoIter = btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FormState {
    type Item = (&'a String, &'a FieldValue);
    type IntoIter = btree_map::Iter<'a, String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
