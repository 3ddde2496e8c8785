mod array;
mod controller;
mod model;
mod rules;
mod submit;
mod subscription;
mod validation;
mod value;


pub use controller::{
    FieldMeta, FormEngine, FormError, FormId, FormOptions, FormResult, StaleValidation, ValidationTicket,
};
pub use formcore_derive::FormModel;
pub use model::{FieldKey, FormModel};
pub use rules::{
    BoxedValidationFuture, CheckKind, EMAIL_EXPRESSION, Measure, RuleCheck, RuleValidator, ValidateTrigger,
    ValidationRule,
};
pub use subscription::{Subscription, SubscriptionId};
pub use validation::{ErrorOrigin, ValidationError, ValidationStatus};
pub use value::{FieldValue, FormState};
