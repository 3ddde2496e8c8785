//! Helpers for list-valued fields. Every edit is a single
//! [`FormEngine::update_field_value`]-style write, so subscribers see one
//! change per call.

use super::controller::{FormEngine, FormError, FormResult};
use super::value::FieldValue;

impl FormEngine {
    /// Pushes `item` onto the list stored in `field`. A nullish field counts
    /// as an empty list.
    pub fn append_field_item(&self, field: impl AsRef<str>, item: impl Into<FieldValue>) -> FormResult<()> {
        let item = item.into();
        self.edit_list(field.as_ref(), "appending list item", move |items| {
            items.push(item);
            Ok(())
        })
    }

    /// Removes and returns the item at `index`.
    pub fn remove_field_item(&self, field: impl AsRef<str>, index: usize) -> FormResult<FieldValue> {
        let field = field.as_ref();
        self.edit_list(field, "removing list item", |items| {
            if index >= items.len() {
                return Err(FormError::IndexOutOfRange {
                    field: field.to_owned(),
                    index,
                    len: items.len(),
                });
            }
            Ok(items.remove(index))
        })
    }

    pub fn update_field_item(
        &self,
        field: impl AsRef<str>,
        index: usize,
        value: impl Into<FieldValue>,
    ) -> FormResult<()> {
        let field = field.as_ref();
        let value = value.into();
        self.edit_list(field, "updating list item", move |items| {
            let len = items.len();
            let slot = items.get_mut(index).ok_or_else(|| FormError::IndexOutOfRange {
                field: field.to_owned(),
                index,
                len,
            })?;
            *slot = value;
            Ok(())
        })
    }

    fn edit_list<F, R>(&self, field: &str, context: &'static str, edit: F) -> FormResult<R>
    where
        F: FnOnce(&mut Vec<FieldValue>) -> FormResult<R>,
    {
        if !self.is_known_field(field)? {
            return Err(FormError::UnknownField(field.to_owned()));
        }
        self.try_update_field_value(field, context, |current| {
            let mut items = match current {
                FieldValue::Undefined | FieldValue::Null => Vec::new(),
                FieldValue::List(items) => items.clone(),
                other => {
                    return Err(FormError::TypeMismatch {
                        field: field.to_owned(),
                        expected: "list",
                        actual: other.type_name(),
                    });
                }
            };
            let output = edit(&mut items)?;
            Ok((FieldValue::List(items), output))
        })
    }
}
