use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use super::path::{FieldPath, IntoFieldPath, PathError};
use super::validation::{BoxedValidationFuture, ErrorMap, FormValidator, ValidationContext};
use super::value::Value;

pub type FieldRuleFn = Arc<dyn Fn(Option<&Value>, &Value) -> Vec<String> + Send + Sync>;

/// Conversion for rule return types: a single message, an optional message
/// or a list of messages.
pub trait RuleOutcome {
    fn into_messages(self) -> Vec<String>;
}

impl RuleOutcome for Vec<String> {
    fn into_messages(self) -> Vec<String> {
        self
    }
}

impl RuleOutcome for Option<String> {
    fn into_messages(self) -> Vec<String> {
        self.into_iter().collect()
    }
}

impl RuleOutcome for Option<&'static str> {
    fn into_messages(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl RuleOutcome for Result<(), String> {
    fn into_messages(self) -> Vec<String> {
        self.err().into_iter().collect()
    }
}

/// Validator with one rule per field path.
///
/// Rules receive the field value (absent when the path does not resolve) and
/// the whole data tree. Dependencies re-run the rules of related fields when
/// their source field is validated.
#[derive(Clone, Default)]
pub struct RuleValidator {
    rules: BTreeMap<FieldPath, FieldRuleFn>,
    dependencies: BTreeMap<FieldPath, BTreeSet<FieldPath>>,
}

impl RuleValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule<P, F, R>(mut self, path: P, rule: F) -> Result<Self, PathError>
    where
        P: IntoFieldPath,
        F: Fn(Option<&Value>, &Value) -> R + Send + Sync + 'static,
        R: RuleOutcome,
    {
        let path = path.into_field_path()?;
        self.rules
            .insert(path, Arc::new(move |value: Option<&Value>, data: &Value| {
                rule(value, data).into_messages()
            }));
        Ok(self)
    }

    /// Validating `source` also validates `dependent`.
    pub fn depends_on<S, D>(mut self, dependent: D, source: S) -> Result<Self, PathError>
    where
        S: IntoFieldPath,
        D: IntoFieldPath,
    {
        self.dependencies
            .entry(source.into_field_path()?)
            .or_default()
            .insert(dependent.into_field_path()?);
        Ok(self)
    }

    pub fn has_rule(&self, path: &FieldPath) -> bool {
        self.rules.contains_key(path)
    }

    fn check(&self, path: &FieldPath, data: &Value) -> Option<Vec<String>> {
        let rule = self.rules.get(path)?;
        Some(rule(super::path::read(data, path), data))
    }

    fn related(&self, path: &FieldPath) -> Vec<FieldPath> {
        std::iter::once(path.clone())
            .chain(self.dependencies.get(path).into_iter().flatten().cloned())
            .collect()
    }

    pub fn validate_field_sync(
        &self,
        path: &FieldPath,
        cx: &mut ValidationContext,
        force: bool,
    ) -> bool {
        let mut valid = true;
        for key in self.related(path) {
            if !force && !cx.is_touched(&key) {
                continue;
            }
            let Some(messages) = self.check(&key, cx.data()) else {
                continue;
            };
            if messages.is_empty() {
                cx.remove_error(&key);
            } else {
                valid = false;
                cx.set_error(key, messages);
            }
        }
        valid
    }

    pub fn validate_form_sync(&self, cx: &mut ValidationContext) -> bool {
        let errors = self
            .rules
            .keys()
            .filter_map(|path| {
                let messages = self.check(path, cx.data())?;
                (!messages.is_empty()).then(|| (path.clone(), messages))
            })
            .collect::<ErrorMap>();
        let valid = errors.is_empty();
        cx.set_errors(errors);
        valid
    }
}

impl FormValidator for RuleValidator {
    fn validate_field<'a>(
        &'a self,
        path: &'a FieldPath,
        cx: &'a mut ValidationContext,
        force: bool,
    ) -> BoxedValidationFuture<'a> {
        let valid = self.validate_field_sync(path, cx, force);
        Box::pin(std::future::ready(valid))
    }

    fn validate_form<'a>(&'a self, cx: &'a mut ValidationContext) -> BoxedValidationFuture<'a> {
        let valid = self.validate_form_sync(cx);
        Box::pin(std::future::ready(valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).expect("valid path")
    }

    fn required(value: Option<&Value>, _data: &Value) -> Option<&'static str> {
        match value.and_then(Value::as_str) {
            Some(text) if !text.is_empty() => None,
            _ => Some("required"),
        }
    }

    fn validator() -> RuleValidator {
        RuleValidator::new()
            .rule("password", required)
            .and_then(|rules| {
                rules.rule("confirm", |value: Option<&Value>, data: &Value| {
                    let password = crate::form::path::read(data, &path("password"));
                    if value == password {
                        None
                    } else {
                        Some("passwords differ".to_string())
                    }
                })
            })
            .and_then(|rules| rules.depends_on("confirm", "password"))
            .expect("rules")
    }

    fn context(data: serde_json::Value, touched: &[&str]) -> ValidationContext {
        ValidationContext::new(
            Value::from(data),
            touched.iter().map(|key| (path(key), true)).collect(),
            ErrorMap::new(),
        )
    }

    #[test]
    fn untouched_fields_are_skipped_unless_forced() {
        let rules = validator();
        let mut cx = context(serde_json::json!({"password": ""}), &[]);
        assert!(rules.validate_field_sync(&path("password"), &mut cx, false));
        assert!(cx.errors().is_empty());

        assert!(!rules.validate_field_sync(&path("password"), &mut cx, true));
        assert_eq!(
            cx.field_errors(&path("password")),
            Some(&["required".to_string()][..])
        );
    }

    #[test]
    fn dependents_are_revalidated_with_their_source() {
        let rules = validator();
        let mut cx = context(
            serde_json::json!({"password": "new", "confirm": "old"}),
            &["password", "confirm"],
        );
        assert!(!rules.validate_field_sync(&path("password"), &mut cx, false));
        assert!(cx.field_errors(&path("password")).is_none());
        assert_eq!(
            cx.field_errors(&path("confirm")),
            Some(&["passwords differ".to_string()][..])
        );
    }

    #[test]
    fn form_validation_replaces_all_errors() {
        let rules = validator();
        let mut cx = ValidationContext::new(
            Value::from(serde_json::json!({"password": "x", "confirm": "x"})),
            BTreeMap::new(),
            [(path("stale"), vec!["old".to_string()])].into_iter().collect(),
        );
        assert!(rules.validate_form_sync(&mut cx));
        assert!(cx.errors().is_empty());
    }

    #[test]
    fn paths_without_rules_are_valid() {
        let rules = validator();
        let mut cx = context(serde_json::json!({"nickname": ""}), &["nickname"]);
        assert!(rules.validate_field_sync(&path("nickname"), &mut cx, true));
        assert!(!rules.has_rule(&path("nickname")));
    }
}
