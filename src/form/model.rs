//! Typed views over the untyped data tree.
//!
//! `#[derive(FormModel)]` implements both traits for a struct with named
//! fields and generates a `<Name>Fields` type whose methods return the
//! [`FieldPath`] of each field.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;

use super::controller::{FormController, FormOptions, FormResult, read_lock};
use super::path::FieldPath;
use super::value::{Value, decimal_from_f64};

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("number {value} does not fit in {target}")]
    OutOfRange { value: String, target: &'static str },
    #[error("field `{field}`: {source}")]
    Field {
        field: String,
        source: Box<ValueError>,
    },
}

impl ValueError {
    fn mismatch(expected: &'static str, found: &Value) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.kind(),
        }
    }
}

pub trait FormValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Result<Self, ValueError>;
}

pub trait FormModel: FormValue + Clone + Send + Sync + 'static {
    type Fields;

    fn fields() -> Self::Fields;
}

/// Reads one field of a model object. A missing key reads as `Null`, so
/// optional fields may be left out of the tree.
pub fn read_field<T: FormValue>(
    entries: &BTreeMap<String, Value>,
    field: &str,
) -> Result<T, ValueError> {
    let value = entries.get(field).unwrap_or(&Value::Null);
    T::from_value(value).map_err(|source| ValueError::Field {
        field: field.to_string(),
        source: Box::new(source),
    })
}

pub fn expect_object(value: &Value) -> Result<&BTreeMap<String, Value>, ValueError> {
    value
        .as_object()
        .ok_or_else(|| ValueError::mismatch("object", value))
}

/// Path of a top-level model field. Used by derived `Fields` types.
pub fn model_field_path(field: &'static str) -> FieldPath {
    FieldPath::field(field)
}

impl FormValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        Ok(value.clone())
    }
}

impl FormValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ValueError::mismatch("string", value))
    }
}

impl FormValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_bool()
            .ok_or_else(|| ValueError::mismatch("bool", value))
    }
}

impl FormValue for Decimal {
    fn to_value(&self) -> Value {
        Value::Number(*self)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_decimal()
            .ok_or_else(|| ValueError::mismatch("number", value))
    }
}

impl FormValue for f64 {
    fn to_value(&self) -> Value {
        decimal_from_f64(*self).map_or(Value::Null, Value::Number)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let number = Decimal::from_value(value)?;
        number.to_f64().ok_or_else(|| ValueError::OutOfRange {
            value: number.to_string(),
            target: "f64",
        })
    }
}

macro_rules! integer_form_value {
    ($($ty:ty => $to:ident),* $(,)?) => {
        $(
            impl FormValue for $ty {
                fn to_value(&self) -> Value {
                    Value::Number(Decimal::from(*self))
                }

                fn from_value(value: &Value) -> Result<Self, ValueError> {
                    let number = Decimal::from_value(value)?;
                    if !number.fract().is_zero() {
                        return Err(ValueError::OutOfRange {
                            value: number.to_string(),
                            target: stringify!($ty),
                        });
                    }
                    number.$to().ok_or_else(|| ValueError::OutOfRange {
                        value: number.to_string(),
                        target: stringify!($ty),
                    })
                }
            }
        )*
    };
}

integer_form_value!(
    i8 => to_i8,
    i16 => to_i16,
    i32 => to_i32,
    i64 => to_i64,
    isize => to_isize,
    u8 => to_u8,
    u16 => to_u16,
    u32 => to_u32,
    u64 => to_u64,
    usize => to_usize,
);

impl<T: FormValue> FormValue for Option<T> {
    fn to_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, FormValue::to_value)
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value).map(Some)
    }
}

impl<T: FormValue> FormValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::Array(self.iter().map(FormValue::to_value).collect())
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        value
            .as_array()
            .ok_or_else(|| ValueError::mismatch("array", value))?
            .iter()
            .enumerate()
            .map(|(index, item)| {
                T::from_value(item).map_err(|source| ValueError::Field {
                    field: index.to_string(),
                    source: Box::new(source),
                })
            })
            .collect()
    }
}

impl<T: FormValue> FormValue for BTreeMap<String, T> {
    fn to_value(&self) -> Value {
        Value::Object(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_value()))
                .collect(),
        )
    }

    fn from_value(value: &Value) -> Result<Self, ValueError> {
        let entries = expect_object(value)?;
        entries
            .keys()
            .map(|key| read_field(entries, key).map(|value| (key.clone(), value)))
            .collect()
    }
}

impl FormController {
    pub fn from_model<M: FormModel>(model: &M, options: FormOptions) -> FormResult<Self> {
        Self::new(model.to_value(), options)
    }

    /// Reads the current data back as `M`.
    pub fn model<M: FormModel>(&self) -> FormResult<M> {
        let state = read_lock(&self.state, "reading form model")?;
        Ok(M::from_value(&state.data)?)
    }

    pub fn initial_model<M: FormModel>(&self) -> FormResult<M> {
        let state = read_lock(&self.state, "reading initial form model")?;
        Ok(M::from_value(&state.initial_values)?)
    }
}
