//! Dotted addresses into the form data tree.
//!
//! A [`FieldPath`] is parsed once from text such as `items.2.name` and then
//! reused as a sequence of [`PathSegment`]s. Index segments are canonical
//! decimal numbers; everything else is an object key.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use super::value::Value;

pub const SEPARATOR: char = '.';

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl PathSegment {
    pub fn parse(segment: &str) -> Self {
        match parse_index(segment) {
            Some(index) => PathSegment::Index(index),
            None => PathSegment::Key(segment.to_string()),
        }
    }

    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(index) => Some(*index),
            PathSegment::Key(_) => None,
        }
    }

    fn object_key(&self) -> std::borrow::Cow<'_, str> {
        match self {
            PathSegment::Key(key) => std::borrow::Cow::Borrowed(key),
            PathSegment::Index(index) => std::borrow::Cow::Owned(index.to_string()),
        }
    }
}

// Indices sort numerically and before keys so `tags.2` precedes `tags.10`.
impl Ord for PathSegment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PathSegment::Index(a), PathSegment::Index(b)) => a.cmp(b),
            (PathSegment::Index(_), PathSegment::Key(_)) => Ordering::Less,
            (PathSegment::Key(_), PathSegment::Index(_)) => Ordering::Greater,
            (PathSegment::Key(a), PathSegment::Key(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for PathSegment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Display for PathSegment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PathSegment::Key(key) => f.write_str(key),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl From<&str> for PathSegment {
    fn from(segment: &str) -> Self {
        PathSegment::parse(segment)
    }
}

impl From<String> for PathSegment {
    fn from(segment: String) -> Self {
        match parse_index(&segment) {
            Some(index) => PathSegment::Index(index),
            None => PathSegment::Key(segment),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,
    #[error("field path `{0}` contains an empty segment")]
    EmptySegment(String),
    #[error("cannot step into {found} at `{path}`")]
    NotAContainer { path: String, found: &'static str },
    #[error("key `{key}` cannot address an array element at `{path}`")]
    KeyOnArray { path: String, key: String },
}

/// A validated, non-empty address into the data tree.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn parse(text: &str) -> Result<Self, PathError> {
        if text.is_empty() {
            return Err(PathError::Empty);
        }
        let segments = text
            .split(SEPARATOR)
            .map(|segment| {
                if segment.is_empty() {
                    Err(PathError::EmptySegment(text.to_string()))
                } else {
                    Ok(PathSegment::parse(segment))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Result<Self, PathError> {
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        if segments
            .iter()
            .any(|segment| matches!(segment, PathSegment::Key(key) if key.is_empty()))
        {
            return Err(PathError::EmptySegment(render(&segments)));
        }
        Ok(Self { segments })
    }

    /// Single-segment path for a top-level field. A canonical decimal key
    /// becomes an index segment, as it would when parsed.
    pub fn field(key: impl Into<String>) -> Self {
        let key: String = key.into();
        Self {
            segments: vec![PathSegment::from(key)],
        }
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn root_key(&self) -> &PathSegment {
        &self.segments[0]
    }

    /// The top-level field this path belongs to.
    pub fn top_level(&self) -> Self {
        Self {
            segments: vec![self.segments[0].clone()],
        }
    }

    pub fn last(&self) -> &PathSegment {
        &self.segments[self.segments.len() - 1]
    }

    pub fn child(&self, segment: impl Into<PathSegment>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn index(&self, index: usize) -> Self {
        self.child(PathSegment::Index(index))
    }

    pub fn join(&self, suffix: &FieldPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(suffix.segments.iter().cloned());
        Self { segments }
    }

    pub fn parent(&self) -> Option<Self> {
        (self.segments.len() > 1).then(|| Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Strict prefixes, nearest first, down to the top-level field.
    pub fn ancestors(&self) -> impl Iterator<Item = FieldPath> + '_ {
        (1..self.segments.len()).rev().map(|len| Self {
            segments: self.segments[..len].to_vec(),
        })
    }

    /// True when `self` equals `prefix` or lies inside its subtree.
    pub fn starts_with(&self, prefix: &FieldPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn strip_prefix(&self, prefix: &FieldPath) -> Option<&[PathSegment]> {
        self.segments.strip_prefix(prefix.segments.as_slice())
    }

    pub(crate) fn with_segment_at(&self, position: usize, segment: PathSegment) -> Self {
        let mut segments = self.segments.clone();
        segments[position] = segment;
        Self { segments }
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            if position > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(text)
    }
}

impl TryFrom<&str> for FieldPath {
    type Error = PathError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        FieldPath::parse(text)
    }
}

pub trait IntoFieldPath {
    fn into_field_path(self) -> Result<FieldPath, PathError>;
}

impl IntoFieldPath for FieldPath {
    fn into_field_path(self) -> Result<FieldPath, PathError> {
        Ok(self)
    }
}

impl IntoFieldPath for &FieldPath {
    fn into_field_path(self) -> Result<FieldPath, PathError> {
        Ok(self.clone())
    }
}

impl IntoFieldPath for &str {
    fn into_field_path(self) -> Result<FieldPath, PathError> {
        FieldPath::parse(self)
    }
}

impl IntoFieldPath for String {
    fn into_field_path(self) -> Result<FieldPath, PathError> {
        FieldPath::parse(&self)
    }
}

impl IntoFieldPath for &String {
    fn into_field_path(self) -> Result<FieldPath, PathError> {
        FieldPath::parse(self)
    }
}

fn parse_index(segment: &str) -> Option<usize> {
    let canonical = !segment.is_empty()
        && segment.bytes().all(|byte| byte.is_ascii_digit())
        && (segment == "0" || !segment.starts_with('0'));
    if canonical { segment.parse().ok() } else { None }
}

pub(super) fn step<'a>(node: &'a Value, segment: &PathSegment) -> Option<&'a Value> {
    match (node, segment) {
        (Value::Array(items), PathSegment::Index(index)) => items.get(*index),
        (Value::Object(entries), segment) => entries.get(segment.object_key().as_ref()),
        _ => None,
    }
}

pub fn read<'a>(tree: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    path.segments
        .iter()
        .try_fold(tree, |node, segment| step(node, segment))
}

pub fn exists(tree: &Value, path: &FieldPath) -> bool {
    read(tree, path).is_some()
}

pub fn read_mut<'a>(tree: &'a mut Value, path: &FieldPath) -> Option<&'a mut Value> {
    let mut node = tree;
    for segment in &path.segments {
        node = match (node, segment) {
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            (Value::Object(entries), segment) => entries.get_mut(segment.object_key().as_ref())?,
            _ => return None,
        };
    }
    Some(node)
}

/// Sets `value` at `path`, creating missing intermediate containers. The
/// container kind follows the next segment: an index creates an array.
pub fn write(tree: &mut Value, path: &FieldPath, value: Value) -> Result<(), PathError> {
    let (last, parents) = path
        .segments
        .split_last()
        .ok_or(PathError::Empty)?;

    let mut node = tree;
    for (position, segment) in parents.iter().enumerate() {
        let next = &path.segments[position + 1];
        let placeholder = || match next {
            PathSegment::Index(_) => Value::array(),
            PathSegment::Key(_) => Value::object(),
        };
        let slot = child_slot(node, segment, &path.segments[..position])?;
        if slot.is_null() {
            *slot = placeholder();
        }
        node = slot;
    }

    let slot = child_slot(node, last, parents)?;
    *slot = value;
    Ok(())
}

/// Deletes the key or array element at `path`, returning what was there.
/// Removing an array element shifts the elements after it.
pub fn remove(tree: &mut Value, path: &FieldPath) -> Option<Value> {
    let (last, parents) = path.segments.split_last()?;
    let mut node = tree;
    for segment in parents {
        node = match (node, segment) {
            (Value::Array(items), PathSegment::Index(index)) => items.get_mut(*index)?,
            (Value::Object(entries), segment) => entries.get_mut(segment.object_key().as_ref())?,
            _ => return None,
        };
    }
    match (node, last) {
        (Value::Array(items), PathSegment::Index(index)) if *index < items.len() => {
            Some(items.remove(*index))
        }
        (Value::Object(entries), segment) => entries.remove(segment.object_key().as_ref()),
        _ => None,
    }
}

fn child_slot<'a>(
    node: &'a mut Value,
    segment: &PathSegment,
    visited: &[PathSegment],
) -> Result<&'a mut Value, PathError> {
    let location = || render(visited);
    match node {
        Value::Array(items) => match segment {
            PathSegment::Index(index) => {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                Ok(&mut items[*index])
            }
            PathSegment::Key(key) => Err(PathError::KeyOnArray {
                path: location(),
                key: key.clone(),
            }),
        },
        Value::Object(entries) => Ok(entries
            .entry(segment.object_key().into_owned())
            .or_insert(Value::Null)),
        other => Err(PathError::NotAContainer {
            path: location(),
            found: other.kind(),
        }),
    }
}

fn render(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}
