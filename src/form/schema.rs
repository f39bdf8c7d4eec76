//! Validation delegated to an external structural schema engine.
//!
//! The engine reports issues with their location as a sequence of object
//! keys and array indices. Issues are flattened into the path-keyed error
//! map; issues without a location land on [`FORM_ERROR_KEY`].

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;

use super::path::{FieldPath, IntoFieldPath, PathError, PathSegment};
use super::validation::{BoxedValidationFuture, ErrorMap, FormValidator, ValidationContext};
use super::value::Value;

pub const FORM_ERROR_KEY: &str = "_form";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SchemaIssue {
    pub path: Vec<PathSegment>,
    pub message: String,
}

impl SchemaIssue {
    pub fn new(path: Vec<PathSegment>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }

    pub fn at(path: &str, message: impl Into<String>) -> Self {
        let path = if path.is_empty() {
            Vec::new()
        } else {
            path.split('.').map(PathSegment::parse).collect()
        };
        Self::new(path, message)
    }
}

pub type BoxedSchemaFuture<'a> = Pin<Box<dyn Future<Output = Vec<SchemaIssue>> + Send + 'a>>;

/// Structural validation engine. An empty issue list means success.
pub trait SchemaEngine: Send + Sync {
    fn check<'a>(&'a self, value: &'a Value) -> BoxedSchemaFuture<'a>;
}

impl<F> SchemaEngine for F
where
    F: Fn(&Value) -> Vec<SchemaIssue> + Send + Sync,
{
    fn check<'a>(&'a self, value: &'a Value) -> BoxedSchemaFuture<'a> {
        Box::pin(std::future::ready((self)(value)))
    }
}

pub fn flatten_issues(issues: Vec<SchemaIssue>) -> ErrorMap {
    let mut errors = ErrorMap::new();
    for issue in issues {
        let path = FieldPath::from_segments(issue.path)
            .unwrap_or_else(|_| FieldPath::field(FORM_ERROR_KEY));
        errors.entry(path).or_default().push(issue.message);
    }
    errors
}

pub struct SchemaValidator<E> {
    engine: E,
    related: BTreeMap<FieldPath, BTreeSet<FieldPath>>,
}

impl<E> SchemaValidator<E>
where
    E: SchemaEngine,
{
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            related: BTreeMap::new(),
        }
    }

    /// Validating `source` also refreshes the errors of `dependent`.
    pub fn depends_on<S, D>(mut self, dependent: D, source: S) -> Result<Self, PathError>
    where
        S: IntoFieldPath,
        D: IntoFieldPath,
    {
        self.related
            .entry(source.into_field_path()?)
            .or_default()
            .insert(dependent.into_field_path()?);
        Ok(self)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }
}

impl<E> FormValidator for SchemaValidator<E>
where
    E: SchemaEngine,
{
    // The whole tree is checked so cross-field refinements are seen; only
    // the requested paths that are touched (or forced) are written back.
    fn validate_field<'a>(
        &'a self,
        path: &'a FieldPath,
        cx: &'a mut ValidationContext,
        force: bool,
    ) -> BoxedValidationFuture<'a> {
        Box::pin(async move {
            let targets = std::iter::once(path)
                .chain(self.related.get(path).into_iter().flatten())
                .filter(|target| force || cx.is_touched(target))
                .cloned()
                .collect::<Vec<_>>();
            if targets.is_empty() {
                return true;
            }
            let mut all = flatten_issues(self.engine.check(cx.data()).await);
            let mut valid = true;
            for target in targets {
                match all.remove(&target) {
                    Some(messages) => {
                        valid = false;
                        cx.set_error(target, messages);
                    }
                    None => cx.remove_error(&target),
                }
            }
            valid
        })
    }

    fn validate_form<'a>(&'a self, cx: &'a mut ValidationContext) -> BoxedValidationFuture<'a> {
        Box::pin(async move {
            let errors = flatten_issues(self.engine.check(cx.data()).await);
            let valid = errors.is_empty();
            cx.set_errors(errors);
            valid
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).expect("valid path")
    }

    fn engine(value: &Value) -> Vec<SchemaIssue> {
        let mut issues = Vec::new();
        let Some(entries) = value.as_object() else {
            return vec![SchemaIssue::at("", "expected an object")];
        };
        if entries.get("name").and_then(Value::as_str).is_none_or(str::is_empty) {
            issues.push(SchemaIssue::at("name", "name is required"));
        }
        if let Some(tags) = entries.get("tags").and_then(Value::as_array) {
            for (index, tag) in tags.iter().enumerate() {
                if tag.as_str().is_none_or(|text| text.len() < 2) {
                    issues.push(SchemaIssue::new(
                        vec![PathSegment::Key("tags".into()), PathSegment::Index(index)],
                        "tag too short",
                    ));
                }
            }
        }
        if entries.get("password") != entries.get("confirm") {
            issues.push(SchemaIssue::at("confirm", "passwords differ"));
        }
        issues
    }

    fn context(data: serde_json::Value) -> ValidationContext {
        ValidationContext::new(Value::from(data), BTreeMap::new(), ErrorMap::new())
    }

    fn touched(fields: &[&str]) -> BTreeMap<FieldPath, bool> {
        fields.iter().map(|field| (path(field), true)).collect()
    }

    #[test]
    fn flatten_joins_segments_and_groups_messages() {
        let errors = flatten_issues(vec![
            SchemaIssue::at("items.0.name", "first"),
            SchemaIssue::at("items.0.name", "second"),
            SchemaIssue::at("", "form level"),
        ]);
        assert_eq!(
            errors.get(&path("items.0.name")),
            Some(&vec!["first".to_string(), "second".to_string()])
        );
        assert_eq!(
            errors.get(&FieldPath::field(FORM_ERROR_KEY)),
            Some(&vec!["form level".to_string()])
        );
    }

    #[test]
    fn form_validation_keys_errors_by_issue_path() {
        let validator = SchemaValidator::new(engine);
        let mut cx = context(serde_json::json!({"name": "", "tags": ["ok", "x"]}));
        assert!(!block_on(validator.validate_form(&mut cx)));
        let keys = cx.errors().keys().map(ToString::to_string).collect::<Vec<_>>();
        assert_eq!(keys, vec!["name", "tags.1"]);
    }

    #[test]
    fn field_validation_only_writes_requested_paths() {
        let validator = SchemaValidator::new(engine);
        let mut cx = ValidationContext::new(
            Value::from(serde_json::json!({"name": "", "tags": ["x"]})),
            touched(&["name", "tags.0"]),
            [(path("tags.0"), vec!["stale".to_string()])].into_iter().collect(),
        );
        assert!(!block_on(validator.validate_field(&path("name"), &mut cx, false)));
        assert_eq!(
            cx.field_errors(&path("tags.0")),
            Some(&["stale".to_string()][..])
        );
        assert_eq!(
            cx.field_errors(&path("name")),
            Some(&["name is required".to_string()][..])
        );
    }

    #[test]
    fn related_paths_see_cross_field_issues() {
        let validator = SchemaValidator::new(engine)
            .depends_on("confirm", "password")
            .expect("paths");
        let mut cx = ValidationContext::new(
            Value::from(serde_json::json!({"name": "a", "password": "1", "confirm": "2"})),
            touched(&["password", "confirm"]),
            ErrorMap::new(),
        );
        assert!(!block_on(validator.validate_field(&path("password"), &mut cx, false)));
        assert!(cx.field_errors(&path("confirm")).is_some());
        assert!(cx.field_errors(&path("password")).is_none());
    }

    #[test]
    fn untouched_targets_are_skipped_unless_forced() {
        let validator = SchemaValidator::new(engine)
            .depends_on("confirm", "password")
            .expect("paths");
        let mut cx = ValidationContext::new(
            Value::from(serde_json::json!({"name": "a", "password": "1", "confirm": "2"})),
            touched(&["password"]),
            ErrorMap::new(),
        );
        assert!(block_on(validator.validate_field(&path("password"), &mut cx, false)));
        assert!(cx.errors().is_empty());

        let mut cx = context(serde_json::json!({"name": "", "password": "1", "confirm": "2"}));
        assert!(block_on(validator.validate_field(&path("name"), &mut cx, false)));
        assert!(cx.field_errors(&path("name")).is_none());

        assert!(!block_on(validator.validate_field(&path("name"), &mut cx, true)));
        assert_eq!(
            cx.field_errors(&path("name")),
            Some(&["name is required".to_string()][..])
        );
        assert!(!block_on(validator.validate_field(&path("password"), &mut cx, true)));
        assert!(cx.field_errors(&path("confirm")).is_some());
    }

    struct DelayedEngine;

    impl SchemaEngine for DelayedEngine {
        fn check<'a>(&'a self, value: &'a Value) -> BoxedSchemaFuture<'a> {
            Box::pin(async move {
                futures_timer::Delay::new(std::time::Duration::from_millis(5)).await;
                engine(value)
            })
        }
    }

    #[test]
    fn asynchronous_engines_are_awaited() {
        let validator = SchemaValidator::new(DelayedEngine);
        let mut cx = context(serde_json::json!({"name": "Ada"}));
        assert!(block_on(validator.validate_form(&mut cx)));
    }
}
