pub use crate::form::{
    ArrayOpOptions, Control, ControlOptions, ElementKind, ElementState, FieldPath, FieldReset,
    FormController, FormError, FormModel, FormOptions, FormResult, FormSnapshot, FormValidator,
    FormValue, RuleValidator, SchemaIssue, SchemaValidator, StateTopic, SubmitEvent,
    SubmitOutcome, SubmitState, ValidationContext, ValidationMode, Value,
};
