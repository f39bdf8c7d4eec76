mod arrays;
mod binding;
mod controller;
mod diff;
mod model;
mod path;
mod rules;
mod schema;
mod shift;
mod validation;
mod value;


pub use binding::{
    Control, ControlOptions, ElementKind, ElementState, SetValueAs, SubmitEvent, SubmitHandler,
};
pub use calmform_derive::FormModel;
pub use controller::{
    ArrayOpOptions, BoxedSubmitFuture, FieldReset, FormController, FormError, FormId, FormOptions,
    FormResult, FormSnapshot, StateTopic, SubmitOutcome, SubmitState, SubscriptionId,
    ValidationMode, ValidationTicket,
};
pub use diff::{changed_paths, changed_paths_at};
pub use model::{FormModel, FormValue, ValueError, expect_object, model_field_path, read_field};
pub use path::{FieldPath, IntoFieldPath, PathError, PathSegment, SEPARATOR};
pub use rules::{FieldRuleFn, RuleOutcome, RuleValidator};
pub use schema::{
    BoxedSchemaFuture, FORM_ERROR_KEY, SchemaEngine, SchemaIssue, SchemaValidator, flatten_issues,
};
pub use shift::{ArrayOp, shift_keys, shift_path, shift_set};
pub use validation::{BoxedValidationFuture, ErrorMap, FormValidator, ValidationContext};
pub use value::{FileValue, Value};

pub mod tree {
    //! Free functions over [`Value`](super::Value) trees addressed by
    //! [`FieldPath`](super::FieldPath).
    pub use super::path::{exists, read, read_mut, remove, write};
}
