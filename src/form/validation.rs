use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_timer::Delay;

use super::controller::{
    FormController, FormResult, StateTopic, ValidationTicket, read_lock, write_lock,
};
use super::path::{self, FieldPath, IntoFieldPath};
use super::shift;
use super::value::Value;

pub type BoxedValidationFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

pub type ErrorMap = BTreeMap<FieldPath, Vec<String>>;

/// Capability shared by every validator adapter.
///
/// Adapters report results by mutating the [`ValidationContext`]. The
/// controller merges only the entries an adapter wrote, so a field-level
/// validation never disturbs errors of unrelated paths.
pub trait FormValidator: Send + Sync {
    /// Validates `path` and its related fields. Untouched fields are skipped
    /// unless `force` is set. Returns whether the checked fields are
    /// error-free.
    fn validate_field<'a>(
        &'a self,
        path: &'a FieldPath,
        cx: &'a mut ValidationContext,
        force: bool,
    ) -> BoxedValidationFuture<'a>;

    /// Validates the whole tree and replaces the error map.
    fn validate_form<'a>(&'a self, cx: &'a mut ValidationContext) -> BoxedValidationFuture<'a>;
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ErrorPatch {
    pub(crate) replace_all: bool,
    pub(crate) entries: BTreeMap<FieldPath, Option<Vec<String>>>,
}

impl ErrorPatch {
    pub(crate) fn apply(self, errors: &mut ErrorMap) {
        if self.replace_all {
            errors.clear();
        }
        for (path, messages) in self.entries {
            match messages {
                Some(messages) if !messages.is_empty() => {
                    errors.insert(path, messages);
                }
                _ => {
                    errors.remove(&path);
                }
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        !self.replace_all && self.entries.is_empty()
    }
}

/// The narrowed view of form state handed to validators.
#[derive(Clone, Debug)]
pub struct ValidationContext {
    data: Value,
    touched: BTreeMap<FieldPath, bool>,
    errors: ErrorMap,
    patch: ErrorPatch,
}

impl ValidationContext {
    pub fn new(data: Value, touched: BTreeMap<FieldPath, bool>, errors: ErrorMap) -> Self {
        Self {
            data,
            touched,
            errors,
            patch: ErrorPatch::default(),
        }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn value(&self, path: &FieldPath) -> Option<&Value> {
        path::read(&self.data, path)
    }

    pub fn is_touched(&self, path: &FieldPath) -> bool {
        self.touched.get(path).copied().unwrap_or(false)
    }

    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    pub fn field_errors(&self, path: &FieldPath) -> Option<&[String]> {
        self.errors.get(path).map(Vec::as_slice)
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// An empty list is treated as a removal; empty lists are never stored.
    pub fn set_error(&mut self, path: FieldPath, messages: Vec<String>) {
        if messages.is_empty() {
            self.remove_error(&path);
            return;
        }
        self.errors.insert(path.clone(), messages.clone());
        self.patch.entries.insert(path, Some(messages));
    }

    pub fn remove_error(&mut self, path: &FieldPath) {
        self.errors.remove(path);
        self.patch.entries.insert(path.clone(), None);
    }

    pub fn set_errors(&mut self, errors: ErrorMap) {
        self.patch = ErrorPatch {
            replace_all: true,
            entries: BTreeMap::new(),
        };
        self.errors.clear();
        for (path, messages) in errors {
            self.set_error(path, messages);
        }
    }

    pub fn clear_errors(&mut self) {
        self.set_errors(ErrorMap::new());
    }

    pub(crate) fn into_patch(self) -> ErrorPatch {
        self.patch
    }
}

struct ValidationRun {
    cx: ValidationContext,
    epoch: u64,
    generation: u64,
}

impl FormController {
    pub fn set_validator(&self, validator: impl FormValidator + 'static) -> FormResult<()> {
        write_lock(&self.hooks, "registering validator")?.validator = Some(Arc::new(validator));
        Ok(())
    }

    pub fn clear_validator(&self) -> FormResult<()> {
        write_lock(&self.hooks, "clearing validator")?.validator = None;
        Ok(())
    }

    /// Writes `value` and waits until the resulting validation has settled.
    pub async fn set_data_async<P>(&self, path: P, value: impl Into<Value>) -> FormResult<bool>
    where
        P: IntoFieldPath,
    {
        self.set_data(path, value)?;
        self.settle().await
    }

    /// Runs the validation queued by earlier writes and merges the results.
    /// Once this resolves, `errors` and `is_valid` reflect every write made
    /// before the call. Returns the resulting validity.
    ///
    /// With a non-zero `validation_debounce` only the latest of overlapping
    /// calls does the work; superseded calls return the current validity.
    pub async fn settle(&self) -> FormResult<bool> {
        let debounce = self.options.validation_debounce;
        if !debounce.is_zero() {
            let ticket = {
                let mut state = write_lock(&self.state, "starting debounced settle")?;
                state.settle_ticket = ValidationTicket(state.settle_ticket.0 + 1);
                state.settle_ticket
            };
            Delay::new(debounce).await;
            let latest = read_lock(&self.state, "checking latest settle ticket")?.settle_ticket;
            if latest != ticket {
                return self.is_valid();
            }
        }

        loop {
            let Some(validator) = self.validator()? else {
                write_lock(&self.state, "dropping queued validation")?
                    .pending
                    .clear();
                break;
            };
            let batch = {
                let mut state = write_lock(&self.state, "taking queued validation")?;
                std::mem::take(&mut state.pending)
            };
            if batch.is_empty() {
                break;
            }
            let mut run = self.begin_validation()?;
            tracing::debug!(paths = batch.len(), "validating changed paths");
            for path in &batch {
                validator.validate_field(path, &mut run.cx, false).await;
            }
            self.finish_validation(run)?;
        }
        self.flush_notifications()?;
        self.is_valid()
    }

    /// Validates the whole form, replacing the error map. Queued field
    /// validation is dropped since this supersedes it.
    pub async fn validate(&self) -> FormResult<bool> {
        let Some(validator) = self.validator()? else {
            return self.is_valid();
        };
        write_lock(&self.state, "clearing queued validation")?
            .pending
            .clear();
        let mut run = self.begin_validation()?;
        let valid = validator.validate_form(&mut run.cx).await;
        self.finish_validation(run)?;
        self.flush_notifications()?;
        Ok(valid)
    }

    /// Validates one field and its related fields, touched or not.
    pub async fn validate_field<P>(&self, path: P) -> FormResult<bool>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let Some(validator) = self.validator()? else {
            return Ok(true);
        };
        let mut run = self.begin_validation()?;
        let valid = validator.validate_field(&path, &mut run.cx, true).await;
        self.finish_validation(run)?;
        self.flush_notifications()?;
        Ok(valid)
    }

    fn begin_validation(&self) -> FormResult<ValidationRun> {
        let mut state = write_lock(&self.state, "starting validation")?;
        state.in_flight += 1;
        Ok(ValidationRun {
            cx: ValidationContext::new(
                state.data.clone(),
                state.touched.clone(),
                state.errors.clone(),
            ),
            epoch: state.layout_epoch(),
            generation: state.generation,
        })
    }

    fn finish_validation(&self, run: ValidationRun) -> FormResult<()> {
        let mut state = write_lock(&self.state, "merging validation result")?;
        state.in_flight = state.in_flight.saturating_sub(1);
        let mut patch = run.cx.into_patch();

        if run.generation != state.generation {
            tracing::warn!(form = %state.id, "discarding validation result after reset");
        } else {
            let skip = usize::try_from(run.epoch.saturating_sub(state.layout_base)).unwrap_or(0);
            for (array, op) in state.layout_log.iter().skip(skip) {
                patch.entries = shift::shift_keys(patch.entries, array, *op);
            }
            if !patch.is_empty() {
                patch.apply(&mut state.errors);
                state.mark(&[StateTopic::Errors, StateTopic::IsValid]);
            }
        }

        if state.in_flight == 0 {
            let epoch = state.layout_epoch();
            state.layout_log.clear();
            state.layout_base = epoch;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> FieldPath {
        FieldPath::parse(text).expect("valid path")
    }

    fn context(errors: &[(&str, &str)]) -> ValidationContext {
        ValidationContext::new(
            Value::object(),
            BTreeMap::new(),
            errors
                .iter()
                .map(|(key, message)| (path(key), vec![message.to_string()]))
                .collect(),
        )
    }

    #[test]
    fn patch_only_carries_written_entries() {
        let mut cx = context(&[("a", "bad a"), ("b", "bad b")]);
        cx.remove_error(&path("a"));
        cx.set_error(path("c"), vec!["bad c".into()]);

        let mut live = ErrorMap::new();
        live.insert(path("a"), vec!["bad a".into()]);
        live.insert(path("z"), vec!["written meanwhile".into()]);
        cx.into_patch().apply(&mut live);

        assert_eq!(live.get(&path("a")), None);
        assert_eq!(live.get(&path("c")), Some(&vec!["bad c".to_string()]));
        assert_eq!(live.get(&path("z")), Some(&vec!["written meanwhile".to_string()]));
    }

    #[test]
    fn empty_lists_are_removals() {
        let mut cx = context(&[("a", "bad a")]);
        cx.set_error(path("a"), Vec::new());
        assert!(cx.is_valid());
        let mut live = ErrorMap::new();
        live.insert(path("a"), vec!["bad a".into()]);
        cx.into_patch().apply(&mut live);
        assert!(live.is_empty());
    }

    #[test]
    fn set_errors_replaces_everything() {
        let mut cx = context(&[("a", "bad a")]);
        let mut next = ErrorMap::new();
        next.insert(path("b"), vec!["bad b".into()]);
        next.insert(path("c"), Vec::new());
        cx.set_errors(next);
        assert_eq!(cx.errors().len(), 1);

        let mut live = ErrorMap::new();
        live.insert(path("a"), vec!["bad a".into()]);
        cx.into_patch().apply(&mut live);
        assert_eq!(live.keys().map(ToString::to_string).collect::<Vec<_>>(), vec!["b"]);
    }
}
