use std::any::Any;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, LazyLock};

use futures::FutureExt;
use futures::future::join_all;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::value::FieldValue;

// Accepts quoted or dotted local parts and either a bracketed IPv4 literal or
// a dotted hostname with an alphabetic TLD of two or more characters.
pub const EMAIL_EXPRESSION: &str = r#"^(([^<>()\[\]\\.,;:\s@"]+(\.[^<>()\[\]\\.,;:\s@"]+)*)|(".+"))@((\[[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\])|(([a-zA-Z\-0-9]+\.)+[a-zA-Z]{2,}))$"#;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_EXPRESSION).expect("email expression must compile"));

/// Event class that decides which rules run in a validation pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ValidateTrigger {
    OnChange,
    OnFinish,
}

/// How a min/max bound reads the field value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Measure {
    /// Character count of text.
    Length,
    /// Numeric value. Numeric text is parsed.
    Number,
    /// Item count of a list.
    Items,
}

pub type BoxedValidationFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'static>>;

/// Asynchronous custom check. `Err` carries the rejection reason.
pub trait RuleValidator: Send + Sync {
    fn validate(&self, value: FieldValue) -> BoxedValidationFuture;
}

impl<F, Fut> RuleValidator for F
where
    F: Fn(FieldValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), String>> + Send + 'static,
{
    fn validate(&self, value: FieldValue) -> BoxedValidationFuture {
        Box::pin((self)(value))
    }
}

/// A single check carried by a [`ValidationRule`].
#[derive(Clone)]
pub enum RuleCheck {
    Required,
    Min { bound: Decimal, measure: Measure },
    Max { bound: Decimal, measure: Measure },
    Pattern(Regex),
    Email,
    Custom(Arc<dyn RuleValidator>),
}

impl RuleCheck {
    pub fn min_length(bound: usize) -> Self {
        RuleCheck::Min {
            bound: Decimal::from(bound),
            measure: Measure::Length,
        }
    }

    pub fn max_length(bound: usize) -> Self {
        RuleCheck::Max {
            bound: Decimal::from(bound),
            measure: Measure::Length,
        }
    }

    pub fn min_number(bound: impl Into<Decimal>) -> Self {
        RuleCheck::Min {
            bound: bound.into(),
            measure: Measure::Number,
        }
    }

    pub fn max_number(bound: impl Into<Decimal>) -> Self {
        RuleCheck::Max {
            bound: bound.into(),
            measure: Measure::Number,
        }
    }

    pub fn min_items(bound: usize) -> Self {
        RuleCheck::Min {
            bound: Decimal::from(bound),
            measure: Measure::Items,
        }
    }

    pub fn max_items(bound: usize) -> Self {
        RuleCheck::Max {
            bound: Decimal::from(bound),
            measure: Measure::Items,
        }
    }

    pub fn custom<V>(validator: V) -> Self
    where
        V: RuleValidator + 'static,
    {
        RuleCheck::Custom(Arc::new(validator))
    }

    pub fn kind(&self) -> CheckKind {
        match self {
            RuleCheck::Required => CheckKind::Required,
            RuleCheck::Min { .. } => CheckKind::Min,
            RuleCheck::Max { .. } => CheckKind::Max,
            RuleCheck::Pattern(_) => CheckKind::Pattern,
            RuleCheck::Email => CheckKind::Email,
            RuleCheck::Custom(_) => CheckKind::Custom,
        }
    }
}

impl Debug for RuleCheck {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleCheck::Required => f.write_str("Required"),
            RuleCheck::Min { bound, measure } => f
                .debug_struct("Min")
                .field("bound", bound)
                .field("measure", measure)
                .finish(),
            RuleCheck::Max { bound, measure } => f
                .debug_struct("Max")
                .field("bound", bound)
                .field("measure", measure)
                .finish(),
            RuleCheck::Pattern(regex) => f.debug_tuple("Pattern").field(&regex.as_str()).finish(),
            RuleCheck::Email => f.write_str("Email"),
            RuleCheck::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Discriminant of a [`RuleCheck`], recorded on every validation error.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CheckKind {
    Required,
    Min,
    Max,
    Pattern,
    Email,
    Custom,
}

/// Declarative constraint attached to a field.
///
/// A rule owns one or more checks that share its message and triggers. Every
/// check runs on its own and a failing check yields its own error, so
/// `required` plus a length range can live in one rule.
#[derive(Clone, Debug)]
pub struct ValidationRule {
    checks: Vec<RuleCheck>,
    message: Option<String>,
    validate_trigger: BTreeSet<ValidateTrigger>,
}

impl ValidationRule {
    pub fn new(check: RuleCheck) -> Self {
        Self {
            checks: vec![check],
            message: None,
            validate_trigger: BTreeSet::from([ValidateTrigger::OnChange, ValidateTrigger::OnFinish]),
        }
    }

    pub fn required() -> Self {
        Self::new(RuleCheck::Required)
    }

    pub fn length(min: usize, max: usize) -> Self {
        Self::new(RuleCheck::min_length(min)).and(RuleCheck::max_length(max))
    }

    pub fn number_range(min: impl Into<Decimal>, max: impl Into<Decimal>) -> Self {
        Self::new(RuleCheck::min_number(min)).and(RuleCheck::max_number(max))
    }

    pub fn items(min: usize, max: usize) -> Self {
        Self::new(RuleCheck::min_items(min)).and(RuleCheck::max_items(max))
    }

    pub fn pattern(regex: Regex) -> Self {
        Self::new(RuleCheck::Pattern(regex))
    }

    pub fn email() -> Self {
        Self::new(RuleCheck::Email)
    }

    pub fn custom<V>(validator: V) -> Self
    where
        V: RuleValidator + 'static,
    {
        Self::new(RuleCheck::custom(validator))
    }

    /// Adds another check to this rule.
    pub fn and(mut self, check: RuleCheck) -> Self {
        self.checks.push(check);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Replaces the trigger set. An empty set makes the rule run only in
    /// untriggered (full) validation passes.
    pub fn validate_trigger(mut self, triggers: impl IntoIterator<Item = ValidateTrigger>) -> Self {
        self.validate_trigger = triggers.into_iter().collect();
        self
    }

    pub fn checks(&self) -> &[RuleCheck] {
        &self.checks
    }

    pub fn error_message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn triggers(&self) -> &BTreeSet<ValidateTrigger> {
        &self.validate_trigger
    }

    pub fn applies_to(&self, trigger: Option<ValidateTrigger>) -> bool {
        trigger.is_none_or(|trigger| self.validate_trigger.contains(&trigger))
    }

    /// Runs every check of this rule against `value` concurrently and returns
    /// the failures in check order. The text is the rule message when set,
    /// otherwise the check's rejection reason as given.
    pub(super) async fn evaluate(&self, value: &FieldValue) -> Vec<(CheckKind, String)> {
        let outcomes = join_all(self.checks.iter().map(|check| run_check(check, value))).await;
        self.checks
            .iter()
            .zip(outcomes)
            .filter_map(|(check, outcome)| {
                outcome
                    .err()
                    .map(|reason| (check.kind(), self.message.clone().unwrap_or(reason)))
            })
            .collect()
    }
}

async fn run_check(check: &RuleCheck, value: &FieldValue) -> Result<(), String> {
    match check {
        RuleCheck::Required => check_required(value),
        RuleCheck::Min { bound, measure } => check_bound(value, *bound, *measure, Bound::Min),
        RuleCheck::Max { bound, measure } => check_bound(value, *bound, *measure, Bound::Max),
        RuleCheck::Pattern(regex) => check_pattern(value, regex, "Invalid format"),
        RuleCheck::Email => check_pattern(value, &EMAIL_PATTERN, "Invalid email address"),
        RuleCheck::Custom(validator) => run_custom(validator.as_ref(), value.clone()).await,
    }
}

fn check_required(value: &FieldValue) -> Result<(), String> {
    let missing = match value {
        FieldValue::Undefined | FieldValue::Null => true,
        FieldValue::Bool(_) | FieldValue::Number(_) | FieldValue::Float(_) | FieldValue::Map(_) => false,
        FieldValue::Text(text) => text.is_empty(),
        FieldValue::List(items) => items.is_empty(),
    };
    if missing {
        Err("field is required".to_owned())
    } else {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Bound {
    Min,
    Max,
}

fn check_bound(value: &FieldValue, bound: Decimal, measure: Measure, kind: Bound) -> Result<(), String> {
    let ordering = match (measure, value) {
        (Measure::Length, FieldValue::Text(text)) => Some(Decimal::from(text.chars().count()).cmp(&bound)),
        (Measure::Items, FieldValue::List(items)) => Some(Decimal::from(items.len()).cmp(&bound)),
        (Measure::Number, value) => compare_number(value, bound),
        _ => None,
    };
    let within = ordering.is_some_and(|ordering| match kind {
        Bound::Min => ordering.is_ge(),
        Bound::Max => ordering.is_le(),
    });
    if within {
        return Ok(());
    }

    let bound = bound.normalize();
    Err(match (kind, measure) {
        (Bound::Min, Measure::Length) => format!("must be at least {bound} characters"),
        (Bound::Max, Measure::Length) => format!("must be at most {bound} characters"),
        (Bound::Min, Measure::Number) => format!("must be at least {bound}"),
        (Bound::Max, Measure::Number) => format!("must be at most {bound}"),
        (Bound::Min, Measure::Items) => format!("must contain at least {bound} items"),
        (Bound::Max, Measure::Items) => format!("must contain at most {bound} items"),
    })
}

// Exact numbers compare as `Decimal`; floats outside its range compare as
// `f64`.
fn compare_number(value: &FieldValue, bound: Decimal) -> Option<Ordering> {
    match value {
        FieldValue::Number(number) => Some(number.cmp(&bound)),
        FieldValue::Float(float) => float.partial_cmp(&bound.to_f64()?),
        FieldValue::Text(text) => {
            let text = text.trim();
            match text.parse::<Decimal>() {
                Ok(number) => Some(number.cmp(&bound)),
                Err(_) => text
                    .parse::<f64>()
                    .ok()
                    .filter(|float| float.is_finite())?
                    .partial_cmp(&bound.to_f64()?),
            }
        }
        _ => None,
    }
}

fn check_pattern(value: &FieldValue, regex: &Regex, default_text: &str) -> Result<(), String> {
    match value {
        FieldValue::Text(text) if regex.is_match(text) => Ok(()),
        _ => Err(default_text.to_owned()),
    }
}

// A panic while building or polling the validator future counts as a
// rejection carrying the panic message.
async fn run_custom(validator: &dyn RuleValidator, value: FieldValue) -> Result<(), String> {
    let future = match panic::catch_unwind(AssertUnwindSafe(|| validator.validate(value))) {
        Ok(future) => future,
        Err(payload) => return Err(panic_message(payload.as_ref())),
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "validator panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn failures(rule: &ValidationRule, value: impl Into<FieldValue>) -> Vec<(CheckKind, String)> {
        block_on(rule.evaluate(&value.into()))
    }

    #[test]
    fn required_accepts_zero_and_false() {
        let rule = ValidationRule::required().message("needed");
        assert!(failures(&rule, 0).is_empty());
        assert!(failures(&rule, false).is_empty());
        assert_eq!(failures(&rule, FieldValue::Undefined).len(), 1);
        assert_eq!(failures(&rule, "").len(), 1);
        assert_eq!(failures(&rule, Vec::<i32>::new()).len(), 1);
        assert!(failures(&rule, vec![1]).is_empty());
    }

    #[test]
    fn number_bounds_parse_numeric_text() {
        let rule = ValidationRule::number_range(4, 8);
        assert!(failures(&rule, "6").is_empty());
        assert_eq!(
            failures(&rule, "12"),
            vec![(CheckKind::Max, "must be at most 8".to_owned())]
        );
        assert_eq!(failures(&rule, "twelve").len(), 2);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let rule = ValidationRule::length(2, 3);
        assert!(failures(&rule, "ñáé").is_empty());
        assert_eq!(failures(&rule, "ñáéí").len(), 1);
    }

    #[test]
    fn email_expression_matches_hostnames_with_tld() {
        let rule = ValidationRule::email();
        for invalid in ["", "abcd", "abcd@", "abcd@.", "abcd@a", "abcd@hostname"] {
            assert_eq!(failures(&rule, invalid).len(), 1, "{invalid} must fail");
        }
        assert!(failures(&rule, "abcd@hostname.com").is_empty());
        assert!(failures(&rule, "first.last@[10.0.0.1]").is_empty());
        assert_eq!(failures(&rule, FieldValue::Undefined).len(), 1);
    }

    #[test]
    fn pattern_rejects_non_text_values() {
        let rule = ValidationRule::pattern(Regex::new("[a-z]+").expect("regex"));
        assert!(failures(&rule, "abcd").is_empty());
        assert_eq!(
            failures(&rule, "123"),
            vec![(CheckKind::Pattern, "Invalid format".to_owned())]
        );
        assert_eq!(failures(&rule, 5).len(), 1);
    }

    #[test]
    fn one_rule_reports_each_failing_check() {
        let rule = ValidationRule::required()
            .and(RuleCheck::min_length(4))
            .message("bad");
        let errors = failures(&rule, "");
        assert_eq!(
            errors,
            vec![
                (CheckKind::Required, "bad".to_owned()),
                (CheckKind::Min, "bad".to_owned())
            ]
        );
    }

    #[test]
    fn custom_rejection_reason_is_used_without_message() {
        let rule = ValidationRule::custom(|value: FieldValue| async move {
            if value.as_text() == Some("taken") {
                Err("name already taken".to_owned())
            } else {
                Ok(())
            }
        });
        assert!(failures(&rule, "free").is_empty());
        assert_eq!(
            failures(&rule, "taken"),
            vec![(CheckKind::Custom, "name already taken".to_owned())]
        );
    }

    #[test]
    fn empty_rejection_reason_is_kept_verbatim() {
        let rule = ValidationRule::custom(|_value: FieldValue| async { Err::<(), String>(String::new()) });
        assert_eq!(failures(&rule, "x"), vec![(CheckKind::Custom, String::new())]);
    }

    #[test]
    fn numbers_beyond_decimal_range_are_present_and_comparable() {
        let required = ValidationRule::required();
        assert!(failures(&required, 1e30).is_empty());
        assert!(failures(&required, 1e-30).is_empty());

        let at_least_one = ValidationRule::new(RuleCheck::min_number(1));
        assert!(failures(&at_least_one, 1e30).is_empty());
        assert_eq!(failures(&at_least_one, 1e-30).len(), 1);
        assert!(failures(&at_least_one, "1e30").is_empty());

        let at_most_one = ValidationRule::new(RuleCheck::max_number(1));
        assert_eq!(failures(&at_most_one, 1e30).len(), 1);
        assert!(failures(&at_most_one, -1e30).is_empty());
    }

    fn explode_before_future(_value: FieldValue) -> BoxedValidationFuture {
        panic!("validator construction failed")
    }

    #[test]
    fn panicking_validator_becomes_a_failure() {
        let rule = ValidationRule::custom(|value: FieldValue| async move {
            if value.is_nullish() {
                return Ok::<(), String>(());
            }
            panic!("lookup exploded")
        });
        assert!(failures(&rule, FieldValue::Undefined).is_empty());
        assert_eq!(
            failures(&rule, "anything"),
            vec![(CheckKind::Custom, "lookup exploded".to_owned())]
        );

        let eager = ValidationRule::custom(explode_before_future);
        assert_eq!(
            failures(&eager, "anything"),
            vec![(CheckKind::Custom, "validator construction failed".to_owned())]
        );

        let with_message = rule.message("lookup failed");
        assert_eq!(
            failures(&with_message, "anything"),
            vec![(CheckKind::Custom, "lookup failed".to_owned())]
        );
    }

    #[test]
    fn trigger_selection() {
        let rule = ValidationRule::required().validate_trigger([ValidateTrigger::OnFinish]);
        assert!(rule.applies_to(None));
        assert!(rule.applies_to(Some(ValidateTrigger::OnFinish)));
        assert!(!rule.applies_to(Some(ValidateTrigger::OnChange)));
    }
}
