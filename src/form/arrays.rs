use super::controller::{
    ArrayOpOptions, FieldChange, FormController, FormError, FormResult, StateTopic, read_lock,
    write_lock,
};
use super::path::{self, FieldPath, IntoFieldPath};
use super::shift::{self, ArrayOp};
use super::value::Value;

impl FormController {
    /// Inserts `value` at `index`, or appends when `index` is `None`. A
    /// missing array is created. Returns the index the value landed at.
    pub fn array_add<P>(
        &self,
        path: P,
        value: impl Into<Value>,
        index: Option<usize>,
    ) -> FormResult<usize>
    where
        P: IntoFieldPath,
    {
        self.array_add_with(path, value, index, self.options.array_ops)
    }

    pub fn array_add_with<P>(
        &self,
        path: P,
        value: impl Into<Value>,
        index: Option<usize>,
        options: ArrayOpOptions,
    ) -> FormResult<usize>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let mut landed = 0;
        self.apply_array_op(
            &path,
            |len| {
                landed = index.unwrap_or(len);
                ArrayOp::Insert(landed)
            },
            Some(value.into()),
            options,
        )?;
        Ok(landed)
    }

    /// Removes the element at `index` and returns it.
    pub fn array_remove<P>(&self, path: P, index: usize) -> FormResult<Value>
    where
        P: IntoFieldPath,
    {
        self.array_remove_with(path, index, self.options.array_ops)
    }

    pub fn array_remove_with<P>(
        &self,
        path: P,
        index: usize,
        options: ArrayOpOptions,
    ) -> FormResult<Value>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let removed = self.apply_array_op(&path, |_| ArrayOp::Remove(index), None, options)?;
        Ok(removed.unwrap_or_default())
    }

    pub fn array_swap<P>(&self, path: P, a: usize, b: usize) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        self.array_swap_with(path, a, b, self.options.array_ops)
    }

    pub fn array_swap_with<P>(
        &self,
        path: P,
        a: usize,
        b: usize,
        options: ArrayOpOptions,
    ) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        self.apply_array_op(&path, |_| ArrayOp::Swap(a, b), None, options)?;
        Ok(())
    }

    pub fn array_move<P>(&self, path: P, from: usize, to: usize) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        self.array_move_with(path, from, to, self.options.array_ops)
    }

    pub fn array_move_with<P>(
        &self,
        path: P,
        from: usize,
        to: usize,
        options: ArrayOpOptions,
    ) -> FormResult<()>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        self.apply_array_op(&path, |_| ArrayOp::Move { from, to }, None, options)?;
        Ok(())
    }

    /// Removes every element deep-equal to `value`. Returns how many were
    /// removed.
    pub fn array_remove_value<P>(&self, path: P, value: &Value) -> FormResult<usize>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let matches = {
            let state = read_lock(&self.state, "scanning array")?;
            array_items(&state.data, &path)?
                .iter()
                .enumerate()
                .filter(|(_, item)| *item == value)
                .map(|(index, _)| index)
                .collect::<Vec<_>>()
        };
        // Highest index first so earlier removals do not move later matches.
        for index in matches.iter().rev() {
            self.array_remove_with(&path, *index, self.options.array_ops)?;
        }
        Ok(matches.len())
    }

    pub fn array_contains<P>(&self, path: P, value: &Value) -> FormResult<bool>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let state = read_lock(&self.state, "scanning array")?;
        Ok(array_items(&state.data, &path)?.contains(value))
    }

    pub fn array_len<P>(&self, path: P) -> FormResult<usize>
    where
        P: IntoFieldPath,
    {
        let path = path.into_field_path()?;
        let state = read_lock(&self.state, "reading array length")?;
        Ok(array_items(&state.data, &path)?.len())
    }

    fn apply_array_op(
        &self,
        path: &FieldPath,
        op_for_len: impl FnOnce(usize) -> ArrayOp,
        inserted: Option<Value>,
        options: ArrayOpOptions,
    ) -> FormResult<Option<Value>> {
        let (removed, change) = {
            let mut state = write_lock(&self.state, "editing array")?;
            let creating = inserted.is_some() && !path::exists(&state.data, path);
            let len = if creating {
                0
            } else {
                array_items(&state.data, path)?.len()
            };
            let op = op_for_len(len);
            if !op.fits(len) {
                return Err(FormError::IndexOutOfRange {
                    path: path.to_string(),
                    index: out_of_range_index(op, len),
                    len,
                });
            }
            if creating {
                path::write(&mut state.data, path, Value::array())?;
            }
            let removed = match path::read_mut(&mut state.data, path)
                .and_then(Value::as_array_mut)
            {
                Some(items) => op.apply(items, inserted),
                None => None,
            };
            tracing::debug!(form = %state.id, path = %path, op = ?op, "applied array edit");

            state.errors = shift::shift_keys(std::mem::take(&mut state.errors), path, op);
            state.touched = shift::shift_keys(std::mem::take(&mut state.touched), path, op);
            state.dirty = shift::shift_keys(std::mem::take(&mut state.dirty), path, op);
            state.pending = shift::shift_set(std::mem::take(&mut state.pending), path, op);
            if state.in_flight > 0 {
                state.layout_log.push((path.clone(), op));
            }

            if options.touch {
                state.touched.insert(path.clone(), true);
            }
            if options.dirty {
                state.refresh_dirty(path);
                for ancestor in path.ancestors().collect::<Vec<_>>() {
                    state.refresh_dirty(&ancestor);
                }
            }
            state.refresh_is_dirty();
            if options.validate {
                state.pending.insert(path.clone());
            }
            state.mark(&[
                StateTopic::Data,
                StateTopic::Touched,
                StateTopic::Dirty,
                StateTopic::Errors,
                StateTopic::IsValid,
            ]);
            let change = FieldChange {
                path: path.clone(),
                value: path::read(&state.data, path).cloned(),
            };
            (removed, change)
        };
        self.dispatch(vec![change])?;
        Ok(removed)
    }
}

fn array_items<'a>(data: &'a Value, path: &FieldPath) -> FormResult<&'a Vec<Value>> {
    match path::read(data, path) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(FormError::NotAnArray {
            path: path.to_string(),
            found: other.kind(),
        }),
        None => Err(FormError::NotAnArray {
            path: path.to_string(),
            found: "nothing",
        }),
    }
}

fn out_of_range_index(op: ArrayOp, len: usize) -> usize {
    match op {
        ArrayOp::Insert(index) | ArrayOp::Remove(index) => index,
        ArrayOp::Swap(a, b) => {
            if a >= len {
                a
            } else {
                b
            }
        }
        ArrayOp::Move { from, to } => {
            if from >= len {
                from
            } else {
                to
            }
        }
    }
}
