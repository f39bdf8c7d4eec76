use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use super::controller::{FormController, FormResult, SubmitOutcome};
use super::path::{FieldPath, IntoFieldPath};
use super::value::{FileValue, Value, decimal_from_str};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ElementKind {
    /// Text-like inputs and textareas.
    Text,
    Number,
    Select { multiple: bool },
    Checkbox,
    Radio,
    File { multiple: bool },
    ContentEditable,
}

/// Raw state of an element as the host reports it or should render it.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementState {
    Text(String),
    /// Values of the selected options, in document order.
    Selection(Vec<String>),
    Checked { checked: bool, value: Option<String> },
    Files(Vec<FileValue>),
}

pub type SetValueAs = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone, Default)]
pub struct ControlOptions {
    pub value_as_number: bool,
    pub set_value_as: Option<SetValueAs>,
}

impl ControlOptions {
    pub fn number() -> Self {
        Self {
            value_as_number: true,
            set_value_as: None,
        }
    }

    pub fn set_value_as(mut self, map: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.set_value_as = Some(Arc::new(map));
        self
    }
}

impl Debug for ControlOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlOptions")
            .field("value_as_number", &self.value_as_number)
            .field("set_value_as", &self.set_value_as.is_some())
            .finish()
    }
}

/// A form field bound to one element. Event methods translate raw element
/// state into writes on the controller.
#[derive(Clone)]
pub struct Control {
    controller: FormController,
    path: FieldPath,
    kind: ElementKind,
    element_value: Option<String>,
    options: ControlOptions,
}

impl Control {
    /// The `value` attribute of a checkbox or radio element.
    pub fn element_value(mut self, value: impl Into<String>) -> Self {
        self.element_value = Some(value.into());
        self
    }

    pub fn path(&self) -> &FieldPath {
        &self.path
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn on_input(&self, state: ElementState) -> FormResult<()> {
        self.write(state)
    }

    pub fn on_change(&self, state: ElementState) -> FormResult<()> {
        self.write(state)
    }

    pub fn on_blur(&self) -> FormResult<()> {
        self.controller.touch(&self.path)
    }

    /// State the element should show for the current field value.
    pub fn element_state(&self) -> FormResult<ElementState> {
        let value = self.controller.value(&self.path)?.unwrap_or_default();
        Ok(render_element(self.kind, &value, self.element_value.as_deref()))
    }

    fn write(&self, state: ElementState) -> FormResult<()> {
        let current = self.controller.value(&self.path)?;
        let Some(value) = read_element(
            self.kind,
            state,
            current.as_ref(),
            self.element_value.as_deref(),
            &self.options,
        ) else {
            return Ok(());
        };
        let value = match &self.options.set_value_as {
            Some(map) => map(value),
            None => value,
        };
        self.controller.set_data(&self.path, value)
    }
}

pub trait SubmitEvent {
    fn prevent_default(&mut self);
}

/// Submit listener for a form element.
#[derive(Clone)]
pub struct SubmitHandler {
    controller: FormController,
}

impl SubmitHandler {
    pub async fn handle(&self, event: &mut impl SubmitEvent) -> FormResult<SubmitOutcome> {
        event.prevent_default();
        self.controller.submit().await
    }
}

impl FormController {
    pub fn control<P>(
        &self,
        path: P,
        kind: ElementKind,
        options: ControlOptions,
    ) -> FormResult<Control>
    where
        P: IntoFieldPath,
    {
        Ok(Control {
            controller: self.clone(),
            path: path.into_field_path()?,
            kind,
            element_value: None,
            options,
        })
    }

    pub fn handler(&self) -> SubmitHandler {
        SubmitHandler {
            controller: self.clone(),
        }
    }
}

/// Converts raw element state into the value to store. `None` means the
/// event carries no write, as for a radio button being unchecked.
fn read_element(
    kind: ElementKind,
    state: ElementState,
    current: Option<&Value>,
    element_value: Option<&str>,
    options: &ControlOptions,
) -> Option<Value> {
    let scalar = |text: String| {
        if options.value_as_number || kind == ElementKind::Number {
            decimal_from_str(&text).map_or(Value::Null, Value::Number)
        } else {
            Value::String(text)
        }
    };

    match (kind, state) {
        (
            ElementKind::Text | ElementKind::Number | ElementKind::ContentEditable,
            ElementState::Text(text),
        ) => Some(scalar(text)),
        (ElementKind::Select { multiple: false }, ElementState::Selection(values)) => {
            Some(values.into_iter().next().map_or(Value::Null, scalar))
        }
        (ElementKind::Select { multiple: true }, ElementState::Selection(values)) => {
            Some(Value::Array(values.into_iter().map(scalar).collect()))
        }
        (ElementKind::Checkbox, ElementState::Checked { checked, value }) => {
            let Some(Value::Array(items)) = current else {
                return Some(Value::Bool(checked));
            };
            let member = value.or_else(|| element_value.map(str::to_string))?;
            let mut items = items
                .iter()
                .filter(|item| item.to_display_string() != member)
                .cloned()
                .collect::<Vec<_>>();
            if checked {
                items.push(scalar(member));
            }
            Some(Value::Array(items))
        }
        (ElementKind::Radio, ElementState::Checked { checked, value }) => {
            if !checked {
                return None;
            }
            value.or_else(|| element_value.map(str::to_string)).map(scalar)
        }
        (ElementKind::File { multiple: false }, ElementState::Files(files)) => {
            Some(files.into_iter().next().map_or(Value::Null, Value::File))
        }
        (ElementKind::File { multiple: true }, ElementState::Files(files)) => {
            Some(Value::Array(files.into_iter().map(Value::File).collect()))
        }
        (kind, state) => {
            tracing::warn!(?kind, ?state, "element state does not match the bound element kind");
            None
        }
    }
}

fn render_element(kind: ElementKind, value: &Value, element_value: Option<&str>) -> ElementState {
    match kind {
        ElementKind::Text | ElementKind::Number | ElementKind::ContentEditable => {
            ElementState::Text(value.to_display_string())
        }
        ElementKind::Select { .. } => ElementState::Selection(match value {
            Value::Null => Vec::new(),
            Value::Array(items) => items.iter().map(Value::to_display_string).collect(),
            other => vec![other.to_display_string()],
        }),
        ElementKind::Checkbox => {
            let checked = match (value, element_value) {
                (Value::Array(items), Some(member)) => {
                    items.iter().any(|item| item.to_display_string() == member)
                }
                (other, _) => other.as_bool().unwrap_or(false),
            };
            ElementState::Checked {
                checked,
                value: element_value.map(str::to_string),
            }
        }
        ElementKind::Radio => ElementState::Checked {
            checked: element_value
                .is_some_and(|own| !value.is_null() && value.to_display_string() == own),
            value: element_value.map(str::to_string),
        },
        ElementKind::File { .. } => ElementState::Files(match value {
            Value::File(file) => vec![file.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|item| match item {
                    Value::File(file) => Some(file.clone()),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }),
    }
}
