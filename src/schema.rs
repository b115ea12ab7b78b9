//! Datapoint definitions
//!
//! A [`Schema`] lists, per family, the datapoints the table will hold. The
//! position of a definition in its family list is the datapoint id.

use std::ops::BitOr;

use crate::value::{Binary, Button, ButtonState, Family, FamilyKind, Float, Int, MultiState, Uint, with_family};

/// Option flags attached to a datapoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DatapointFlags(u32);

impl DatapointFlags {
    pub const NONE: DatapointFlags = DatapointFlags(0);
    /// Value should survive a restart. Advisory only; nothing is persisted.
    pub const NVM: DatapointFlags = DatapointFlags(1 << 0);

    pub const fn from_bits(bits: u32) -> Self {
        DatapointFlags(bits)
    }
    pub const fn bits(self) -> u32 {
        self.0
    }
    pub const fn contains(self, other: DatapointFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for DatapointFlags {
    type Output = DatapointFlags;
    fn bitor(self, rhs: Self) -> Self::Output {
        DatapointFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatapointDef<T> {
    pub name: String,
    pub flags: DatapointFlags,
    pub default: T,
}

/// The datapoints of every family, in id order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    pub(crate) binary: Vec<DatapointDef<bool>>,
    pub(crate) button: Vec<DatapointDef<ButtonState>>,
    pub(crate) float: Vec<DatapointDef<f32>>,
    pub(crate) int: Vec<DatapointDef<i32>>,
    pub(crate) multi_state: Vec<DatapointDef<u32>>,
    pub(crate) uint: Vec<DatapointDef<u32>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a datapoint to family `F`, builder style
    pub fn with<F: FamilyKind>(
        mut self,
        name: impl Into<String>,
        flags: DatapointFlags,
        default: F::Value,
    ) -> Self {
        self.push::<F>(name, flags, default);
        self
    }

    /// Append a datapoint to family `F`, returning its id
    pub fn push<F: FamilyKind>(
        &mut self,
        name: impl Into<String>,
        flags: DatapointFlags,
        default: F::Value,
    ) -> usize {
        let defs = F::definitions_mut(self);
        defs.push(DatapointDef {
            name: name.into(),
            flags,
            default,
        });
        defs.len() - 1
    }

    /// `count` datapoints of family `F`, all holding `default`
    pub fn with_uniform<F: FamilyKind>(mut self, count: usize, default: F::Value) -> Self {
        let prefix = F::FAMILY.name().replace([' ', '-'], "_").to_uppercase();
        for i in 0..count {
            self.push::<F>(format!("{prefix}_{i}"), DatapointFlags::NONE, default);
        }
        self
    }

    pub fn definitions<F: FamilyKind>(&self) -> &[DatapointDef<F::Value>] {
        F::definitions(self)
    }

    pub fn count(&self, family: Family) -> usize {
        with_family!(family, F => F::definitions(self).len())
    }

    pub fn counts(&self) -> [usize; crate::value::FAMILY_COUNT] {
        Family::ALL.map(|family| self.count(family))
    }

    /// Id of the first datapoint of family `F` called `name`
    pub fn find<F: FamilyKind>(&self, name: &str) -> Option<usize> {
        F::definitions(self).iter().position(|def| def.name == name)
    }

    /// Look `name` up across every family
    pub fn lookup(&self, name: &str) -> Option<(Family, usize)> {
        Family::ALL.into_iter().find_map(|family| {
            let id = with_family!(family, F => self.find::<F>(name));
            id.map(|id| (family, id))
        })
    }

    /// The stock firmware table: four datapoints per family, all flagged NVM
    pub fn firmware() -> Self {
        let nvm = DatapointFlags::NVM;
        Schema::new()
            .with::<Binary>("BINARY_FIRST_DATAPOINT", nvm, true)
            .with::<Binary>("BINARY_SECOND_DATAPOINT", nvm, false)
            .with::<Binary>("BINARY_THIRD_DATAPOINT", nvm, true)
            .with::<Binary>("BINARY_FOURTH_DATAPOINT", nvm, false)
            .with::<Button>("BUTTON_FIRST_DATAPOINT", nvm, ButtonState::Unpressed)
            .with::<Button>("BUTTON_SECOND_DATAPOINT", nvm, ButtonState::Unpressed)
            .with::<Button>("BUTTON_THIRD_DATAPOINT", nvm, ButtonState::Unpressed)
            .with::<Button>("BUTTON_FOURTH_DATAPOINT", nvm, ButtonState::Unpressed)
            .with::<Float>("FLOAT_FIRST_DATAPOINT", nvm, 0.0)
            .with::<Float>("FLOAT_SECOND_DATAPOINT", nvm, 1.0)
            .with::<Float>("FLOAT_THIRD_DATAPOINT", nvm, 2.0)
            .with::<Float>("FLOAT_FOURTH_DATAPOINT", nvm, 3.0)
            .with::<Int>("INT_FIRST_DATAPOINT", nvm, 0)
            .with::<Int>("INT_SECOND_DATAPOINT", nvm, 0)
            .with::<Int>("INT_THIRD_DATAPOINT", nvm, 1)
            .with::<Int>("INT_FOURTH_DATAPOINT", nvm, 2)
            .with::<MultiState>("MULTI_STATE_FIRST_DATAPOINT", nvm, 1)
            .with::<MultiState>("MULTI_STATE_SECOND_DATAPOINT", nvm, 3)
            .with::<MultiState>("MULTI_STATE_THIRD_DATAPOINT", nvm, 0)
            .with::<MultiState>("MULTI_STATE_FOURTH_DATAPOINT", nvm, 2)
            .with::<Uint>("UINT_FIRST_DATAPOINT", nvm, 0)
            .with::<Uint>("UINT_SECOND_DATAPOINT", nvm, 1)
            .with::<Uint>("UINT_THIRD_DATAPOINT", nvm, 2)
            .with::<Uint>("UINT_FOURTH_DATAPOINT", nvm, 3)
    }
}
