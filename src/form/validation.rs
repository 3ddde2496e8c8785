use std::fmt::{Display, Formatter};

use futures::future::join_all;
use futures_timer::Delay;
use tracing::debug;

use super::controller::{FormEngine, FormError, FormResult, StaleValidation, ValidationTicket, write_lock};
use super::rules::{CheckKind, ValidateTrigger, ValidationRule};
use super::value::FieldValue;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub enum ValidationStatus {
    #[default]
    NotStarted,
    Validating,
    Success,
    Error,
}

/// Where a [`ValidationError`] came from.
#[derive(Clone, Debug)]
pub enum ErrorOrigin {
    /// A failing check of the rule at `index` in the field's rule set.
    Rule {
        rule: ValidationRule,
        index: usize,
        check: CheckKind,
    },
    /// Injected through [`FormEngine::set_field_errors`].
    External,
}

/// One failing check for one field in one validation pass.
#[derive(Clone, Debug)]
pub struct ValidationError {
    pub field: String,
    pub value: FieldValue,
    pub error_text: String,
    pub origin: ErrorOrigin,
}

impl ValidationError {
    pub(super) fn external(field: &str, value: FieldValue, error_text: impl Into<String>) -> Self {
        Self {
            field: field.to_owned(),
            value,
            error_text: error_text.into(),
            origin: ErrorOrigin::External,
        }
    }

    pub fn rule(&self) -> Option<&ValidationRule> {
        match &self.origin {
            ErrorOrigin::Rule { rule, .. } => Some(rule),
            ErrorOrigin::External => None,
        }
    }

    pub fn rule_index(&self) -> Option<usize> {
        match &self.origin {
            ErrorOrigin::Rule { index, .. } => Some(*index),
            ErrorOrigin::External => None,
        }
    }

    pub fn check(&self) -> Option<CheckKind> {
        match &self.origin {
            ErrorOrigin::Rule { check, .. } => Some(*check),
            ErrorOrigin::External => None,
        }
    }
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.error_text)
    }
}

impl FormEngine {
    /// Runs the rules of `field` selected by `trigger` (every rule for
    /// `None`) and returns one error per failing check, in rule order and
    /// then check order.
    ///
    /// Status moves to `Validating` before the checks start. Once they all
    /// settle the error cache, error subscribers and status subscribers are
    /// updated, unless a newer write or run superseded this one under
    /// [`StaleValidation::Discard`].
    pub async fn get_field_error(
        &self,
        field: impl AsRef<str>,
        trigger: Option<ValidateTrigger>,
    ) -> FormResult<Vec<ValidationError>> {
        let field = field.as_ref();
        if !self.is_known_field(field)? {
            return Err(FormError::UnknownField(field.to_owned()));
        }
        let rules = self.field_rules(field)?;
        let (ticket, value) = {
            let mut store = write_lock(&self.store, "starting field validation")?;
            let ticket = store.next_ticket(field);
            store.field_meta.entry(field.to_owned()).or_default().status = ValidationStatus::Validating;
            (ticket, store.values.value(field))
        };
        debug!(form = self.id.0, field, ?trigger, ticket = ticket.0, "validation started");
        self.notify_status(field, ValidationStatus::Validating, &[])?;

        let selected = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.applies_to(trigger))
            .collect::<Vec<_>>();
        let outcomes = join_all(selected.iter().map(|(_, rule)| rule.evaluate(&value))).await;

        let mut errors = Vec::new();
        for ((index, rule), failures) in selected.into_iter().zip(outcomes) {
            errors.extend(failures.into_iter().map(|(check, error_text)| ValidationError {
                field: field.to_owned(),
                value: value.clone(),
                error_text,
                origin: ErrorOrigin::Rule {
                    rule: rule.clone(),
                    index,
                    check,
                },
            }));
        }
        debug!(form = self.id.0, field, ?trigger, errors = errors.len(), "validation finished");

        self.finish_validation(field, ticket, &errors)?;
        Ok(errors)
    }

    /// Validates `fields` (every known field for `None`) concurrently and
    /// flattens the errors in field order.
    pub async fn get_fields_error(
        &self,
        fields: Option<&[&str]>,
        trigger: Option<ValidateTrigger>,
    ) -> FormResult<Vec<ValidationError>> {
        let fields = match fields {
            Some(fields) => {
                for field in fields {
                    if !self.is_known_field(field)? {
                        return Err(FormError::UnknownField((*field).to_owned()));
                    }
                }
                fields.iter().map(|field| (*field).to_owned()).collect()
            }
            None => self.known_fields()?,
        };

        let results = join_all(fields.iter().map(|field| self.get_field_error(field, trigger))).await;
        let mut errors = Vec::new();
        for result in results {
            errors.extend(result?);
        }
        Ok(errors)
    }

    pub async fn validate_field(
        &self,
        field: impl AsRef<str>,
        trigger: Option<ValidateTrigger>,
    ) -> FormResult<()> {
        into_outcome(self.get_field_error(field, trigger).await?)
    }

    pub async fn validate_fields(
        &self,
        fields: Option<&[&str]>,
        trigger: Option<ValidateTrigger>,
    ) -> FormResult<()> {
        into_outcome(self.get_fields_error(fields, trigger).await?)
    }

    /// Writes `value` the way an input edit does: after
    /// [`FormOptions::change_debounce`](super::FormOptions::change_debounce)
    /// the `OnChange` rules run, unless the field was written again in the
    /// meantime, in which case `Ok(None)` is returned.
    pub async fn change_field_value(
        &self,
        field: impl AsRef<str>,
        value: impl Into<FieldValue>,
    ) -> FormResult<Option<Vec<ValidationError>>> {
        let field = field.as_ref();
        self.set_field_value(field, value)?;
        let revision = self.field_revision(field)?;

        if !self.options.change_debounce.is_zero() {
            Delay::new(self.options.change_debounce).await;
        }
        if self.field_revision(field)? != revision {
            debug!(form = self.id.0, field, "change validation superseded");
            return Ok(None);
        }
        self.get_field_error(field, Some(ValidateTrigger::OnChange))
            .await
            .map(Some)
    }

    fn finish_validation(
        &self,
        field: &str,
        ticket: ValidationTicket,
        errors: &[ValidationError],
    ) -> FormResult<()> {
        let (status, state) = {
            let mut store = write_lock(&self.store, "finishing field validation")?;
            if self.options.stale_validation == StaleValidation::Discard
                && !store.is_latest_ticket(field, ticket)
            {
                debug!(form = self.id.0, field, ticket = ticket.0, "stale validation result discarded");
                return Ok(());
            }
            let status = if errors.is_empty() {
                ValidationStatus::Success
            } else {
                ValidationStatus::Error
            };
            let meta = store.field_meta.entry(field.to_owned()).or_default();
            meta.errors = errors.to_vec();
            meta.status = status;
            (status, store.values.clone())
        };
        self.notify_errors(field, errors, &state)?;
        self.notify_status(field, status, errors)
    }
}

fn into_outcome(errors: Vec<ValidationError>) -> FormResult<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(FormError::Invalid(errors))
    }
}
