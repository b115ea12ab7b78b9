//! Typed datapoint storage

use tracing::trace;

use crate::{
    error::DatastoreError,
    range::check_bounds,
    schema::{DatapointDef, Schema},
    value::{DatapointValue, FAMILY_COUNT, Family, FamilyKind, with_family},
};

/// Values and definitions of one family, indexed by datapoint id
#[derive(Debug, Clone)]
pub struct Column<T> {
    values: Vec<T>,
    definitions: Vec<DatapointDef<T>>,
}

impl<T: DatapointValue> Column<T> {
    fn new(definitions: &[DatapointDef<T>]) -> Self {
        Column {
            values: definitions.iter().map(|def| def.default).collect(),
            definitions: definitions.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn definition(&self, id: usize) -> Option<&DatapointDef<T>> {
        self.definitions.get(id)
    }

    /// Id of the first datapoint called `name`
    pub fn find(&self, name: &str) -> Option<usize> {
        self.definitions.iter().position(|def| def.name == name)
    }

    pub fn defaults(&self) -> Vec<T> {
        self.definitions.iter().map(|def| def.default).collect()
    }
}

/// Which ids of one write received a different value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    start: usize,
    changed: Vec<bool>,
}

impl ChangeSet {
    /// Whether any id in the write changed
    pub fn any(&self) -> bool {
        self.changed.iter().any(|c| *c)
    }

    /// Ids touched by the write, ascending
    pub fn ids(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.changed.len()
    }

    /// Ids whose own value changed, ascending
    pub fn changed_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.changed
            .iter()
            .enumerate()
            .filter(|(_, c)| **c)
            .map(move |(i, _)| self.start + i)
    }

    pub fn is_changed(&self, id: usize) -> bool {
        id.checked_sub(self.start)
            .and_then(|i| self.changed.get(i))
            .copied()
            .unwrap_or(false)
    }
}

/// The current value of every datapoint in a [`Schema`]
#[derive(Debug, Clone)]
pub struct DatapointTable {
    pub(crate) binary: Column<bool>,
    pub(crate) button: Column<crate::value::ButtonState>,
    pub(crate) float: Column<f32>,
    pub(crate) int: Column<i32>,
    pub(crate) multi_state: Column<u32>,
    pub(crate) uint: Column<u32>,
}

impl DatapointTable {
    /// Create a table with every datapoint at its default
    pub fn from_schema(schema: &Schema) -> Self {
        DatapointTable {
            binary: Column::new(&schema.binary),
            button: Column::new(&schema.button),
            float: Column::new(&schema.float),
            int: Column::new(&schema.int),
            multi_state: Column::new(&schema.multi_state),
            uint: Column::new(&schema.uint),
        }
    }

    pub fn column<F: FamilyKind>(&self) -> &Column<F::Value> {
        F::column(self)
    }

    pub fn count(&self, family: Family) -> usize {
        with_family!(family, F => F::column(self).len())
    }

    pub fn counts(&self) -> [usize; FAMILY_COUNT] {
        Family::ALL.map(|family| self.count(family))
    }

    /// Copy `count` values starting at `start` into the front of `out`
    pub fn read<F: FamilyKind>(
        &self,
        start: usize,
        count: usize,
        out: &mut [F::Value],
    ) -> Result<(), DatastoreError> {
        let column = F::column(self);
        check_bounds(start, count, column.len())?;
        if out.len() < count {
            return Err(DatastoreError::InvalidArg("output buffer shorter than count"));
        }
        out[..count].copy_from_slice(&column.values[start..start + count]);
        Ok(())
    }

    /// The stored values of `start..start + count`
    pub fn slice<F: FamilyKind>(
        &self,
        start: usize,
        count: usize,
    ) -> Result<&[F::Value], DatastoreError> {
        let column = F::column(self);
        check_bounds(start, count, column.len())?;
        Ok(&column.values[start..start + count])
    }

    /// Store `values` from `start` on, reporting which ids changed.
    ///
    /// Values are stored even when equal to the current ones.
    pub fn write<F: FamilyKind>(
        &mut self,
        start: usize,
        values: &[F::Value],
    ) -> Result<ChangeSet, DatastoreError> {
        let column = F::column_mut(self);
        check_bounds(start, values.len(), column.len())?;
        let stored = &mut column.values[start..start + values.len()];
        let changed = stored
            .iter()
            .zip(values)
            .map(|(old, new)| !old.same_as(new))
            .collect();
        stored.copy_from_slice(values);
        trace!("{}: stored {} values at {start}", F::FAMILY, values.len());
        Ok(ChangeSet { start, changed })
    }

    pub fn definition<F: FamilyKind>(&self, id: usize) -> Option<&DatapointDef<F::Value>> {
        F::column(self).definition(id)
    }
}
