//! Datapoint value families and their word representation
//!
//! Every family stores its values as one native-endian 32-bit word when it
//! is copied into a payload, regardless of the in-memory Rust type. Booleans
//! become `0`/`1`, and button states become their ordinal.

use std::fmt::{self, Debug, Display};

use nom::{
    IResult,
    error::{Error, ErrorKind},
    number::{Endianness, complete as number},
};
use num::traits::ToBytes;

use crate::{
    schema::{DatapointDef, Schema},
    table::{Column, DatapointTable},
};

/// Number of value families
pub const FAMILY_COUNT: usize = 6;

/// Size of one encoded value inside a payload
pub const WORD_SIZE: usize = 4;

/// The closed set of datapoint value families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Binary = 0,
    Button = 1,
    Float = 2,
    Int = 3,
    MultiState = 4,
    Uint = 5,
}

impl Family {
    /// All families, in registry order
    pub const ALL: [Family; FAMILY_COUNT] = [
        Family::Binary,
        Family::Button,
        Family::Float,
        Family::Int,
        Family::MultiState,
        Family::Uint,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Family::Binary => "binary",
            Family::Button => "button",
            Family::Float => "float",
            Family::Int => "signed integer",
            Family::MultiState => "multi-state",
            Family::Uint => "unsigned integer",
        }
    }
}

impl Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// State of a physical button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum ButtonState {
    #[default]
    Unpressed = 0,
    ShortPressed = 1,
    LongPressed = 2,
}

impl TryFrom<u32> for ButtonState {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ButtonState::Unpressed),
            1 => Ok(ButtonState::ShortPressed),
            2 => Ok(ButtonState::LongPressed),
            other => Err(other),
        }
    }
}

impl Display for ButtonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ButtonState::Unpressed => "unpressed",
            ButtonState::ShortPressed => "short_pressed",
            ButtonState::LongPressed => "long_pressed",
        })
    }
}

/// A value that can be stored in a datapoint
pub trait DatapointValue: Copy + Debug + Display + PartialEq + Send + Sync + 'static {
    /// Bytes taken by one value inside a payload
    const SIZE: usize = WORD_SIZE;

    /// Exact equality used for change detection.
    ///
    /// Floats compare by bit pattern, so `-0.0` differs from `0.0` and a NaN
    /// only equals a NaN with identical bits.
    fn same_as(&self, other: &Self) -> bool;

    /// Write the value into the first [`Self::SIZE`] bytes of `out`
    fn encode(&self, out: &mut [u8]);

    /// Decode one value from the front of `input`
    fn parse(input: &[u8]) -> IResult<&[u8], Self>;
}

fn put_word<T: ToBytes>(value: T, out: &mut [u8]) {
    let bytes = value.to_ne_bytes();
    let bytes = bytes.as_ref();
    out[..bytes.len()].copy_from_slice(bytes);
}

fn word(input: &[u8]) -> IResult<&[u8], u32> {
    number::u32(Endianness::Native)(input)
}

impl DatapointValue for bool {
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
    fn encode(&self, out: &mut [u8]) {
        put_word(u32::from(*self), out)
    }
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, raw) = word(input)?;
        Ok((rest, raw != 0))
    }
}

impl DatapointValue for ButtonState {
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
    fn encode(&self, out: &mut [u8]) {
        put_word(*self as u32, out)
    }
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        let (rest, raw) = word(input)?;
        match ButtonState::try_from(raw) {
            Ok(state) => Ok((rest, state)),
            Err(_) => Err(nom::Err::Error(Error::new(input, ErrorKind::Verify))),
        }
    }
}

impl DatapointValue for f32 {
    fn same_as(&self, other: &Self) -> bool {
        self.to_bits() == other.to_bits()
    }
    fn encode(&self, out: &mut [u8]) {
        put_word(*self, out)
    }
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        number::f32(Endianness::Native)(input)
    }
}

impl DatapointValue for i32 {
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
    fn encode(&self, out: &mut [u8]) {
        put_word(*self, out)
    }
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        number::i32(Endianness::Native)(input)
    }
}

impl DatapointValue for u32 {
    fn same_as(&self, other: &Self) -> bool {
        self == other
    }
    fn encode(&self, out: &mut [u8]) {
        put_word(*self, out)
    }
    fn parse(input: &[u8]) -> IResult<&[u8], Self> {
        word(input)
    }
}

/// Compile-time handle on one value family
///
/// The datastore internals are written once, generically over this trait;
/// the zero-sized markers below ([`Binary`], [`Button`], ...) select which
/// column, schema list and registry an operation touches.
pub trait FamilyKind: Send + Sync + 'static {
    type Value: DatapointValue;
    const FAMILY: Family;

    fn definitions(schema: &Schema) -> &[DatapointDef<Self::Value>];
    fn definitions_mut(schema: &mut Schema) -> &mut Vec<DatapointDef<Self::Value>>;
    fn column(table: &DatapointTable) -> &Column<Self::Value>;
    fn column_mut(table: &mut DatapointTable) -> &mut Column<Self::Value>;
    fn wrap(values: Vec<Self::Value>) -> FamilyValues;
    fn unwrap(values: &FamilyValues) -> Option<&[Self::Value]>;
}

macro_rules! family_marker {
    ($marker:ident, $value:ty, $field:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $marker;

        impl FamilyKind for $marker {
            type Value = $value;
            const FAMILY: Family = Family::$marker;

            fn definitions(schema: &Schema) -> &[DatapointDef<$value>] {
                &schema.$field
            }
            fn definitions_mut(schema: &mut Schema) -> &mut Vec<DatapointDef<$value>> {
                &mut schema.$field
            }
            fn column(table: &DatapointTable) -> &Column<$value> {
                &table.$field
            }
            fn column_mut(table: &mut DatapointTable) -> &mut Column<$value> {
                &mut table.$field
            }
            fn wrap(values: Vec<$value>) -> FamilyValues {
                FamilyValues::$marker(values)
            }
            fn unwrap(values: &FamilyValues) -> Option<&[$value]> {
                match values {
                    FamilyValues::$marker(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

family_marker!(Binary, bool, binary, "Boolean datapoints");
family_marker!(Button, ButtonState, button, "Button state datapoints");
family_marker!(Float, f32, float, "32-bit float datapoints");
family_marker!(Int, i32, int, "Signed 32-bit integer datapoints");
family_marker!(MultiState, u32, multi_state, "Multi-state (ordinal) datapoints");
family_marker!(Uint, u32, uint, "Unsigned 32-bit integer datapoints");

/// Run `$body` with `$kind` bound to the marker type of a runtime [`Family`]
macro_rules! with_family {
    ($family:expr, $kind:ident => $body:expr) => {
        match $family {
            $crate::value::Family::Binary => {
                type $kind = $crate::value::Binary;
                $body
            }
            $crate::value::Family::Button => {
                type $kind = $crate::value::Button;
                $body
            }
            $crate::value::Family::Float => {
                type $kind = $crate::value::Float;
                $body
            }
            $crate::value::Family::Int => {
                type $kind = $crate::value::Int;
                $body
            }
            $crate::value::Family::MultiState => {
                type $kind = $crate::value::MultiState;
                $body
            }
            $crate::value::Family::Uint => {
                type $kind = $crate::value::Uint;
                $body
            }
        }
    };
}
pub(crate) use with_family;

/// A run of values of any one family
#[derive(Clone, Debug, PartialEq)]
pub enum FamilyValues {
    Binary(Vec<bool>),
    Button(Vec<ButtonState>),
    Float(Vec<f32>),
    Int(Vec<i32>),
    MultiState(Vec<u32>),
    Uint(Vec<u32>),
}

impl FamilyValues {
    pub fn family(&self) -> Family {
        match self {
            FamilyValues::Binary(_) => Family::Binary,
            FamilyValues::Button(_) => Family::Button,
            FamilyValues::Float(_) => Family::Float,
            FamilyValues::Int(_) => Family::Int,
            FamilyValues::MultiState(_) => Family::MultiState,
            FamilyValues::Uint(_) => Family::Uint,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            FamilyValues::Binary(v) => v.len(),
            FamilyValues::Button(v) => v.len(),
            FamilyValues::Float(v) => v.len(),
            FamilyValues::Int(v) => v.len(),
            FamilyValues::MultiState(v) => v.len(),
            FamilyValues::Uint(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Display for FamilyValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: Display>(f: &mut fmt::Formatter<'_>, values: &[T]) -> fmt::Result {
            for (i, v) in values.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{v}")?;
            }
            Ok(())
        }
        match self {
            FamilyValues::Binary(v) => join(f, v),
            FamilyValues::Button(v) => join(f, v),
            FamilyValues::Float(v) => join(f, v),
            FamilyValues::Int(v) => join(f, v),
            FamilyValues::MultiState(v) => join(f, v),
            FamilyValues::Uint(v) => join(f, v),
        }
    }
}
