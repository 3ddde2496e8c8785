pub use crate::form::{
    FieldKey, FieldValue, FormEngine, FormError, FormModel, FormOptions, FormResult, FormState, RuleCheck,
    StaleValidation, Subscription, ValidateTrigger, ValidationError, ValidationRule, ValidationStatus,
};
