//! Snapshot payloads
//!
//! A payload is a pool block laid out as
//!
//! ```text
//! offset 0            pool id       (usize, native endian)
//! offset W            data length   (usize, bytes of values that follow)
//! offset 2W           values        (one word per datapoint, ascending id)
//! ```
//!
//! with `W = size_of::<usize>()`. The block goes back to its pool when the
//! [`Payload`] is released or dropped, whichever happens first.

use std::{fmt, sync::Arc};

use nom::{IResult, Parser, bytes::complete::take, multi::count};

use crate::{
    error::DatastoreError,
    pool::{BufferPool, PoolId},
    value::{DatapointValue, Family, FamilyKind, FamilyValues, with_family},
};

/// Width of each header field
pub const HEADER_WORD: usize = size_of::<usize>();

/// Bytes in front of the values
pub const HEADER_LEN: usize = 2 * HEADER_WORD;

/// Decoded payload header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub pool_id: PoolId,
    pub data_length: usize,
}

fn header_word(input: &[u8]) -> IResult<&[u8], usize> {
    let (rest, raw) = take::<_, _, nom::error::Error<&[u8]>>(HEADER_WORD).parse(input)?;
    let mut bytes = [0u8; HEADER_WORD];
    bytes.copy_from_slice(raw);
    Ok((rest, usize::from_ne_bytes(bytes)))
}

/// Parse the header from the front of a payload block
pub fn parse_header(input: &[u8]) -> IResult<&[u8], PayloadHeader> {
    let (rest, (pool_id, data_length)) = (header_word, header_word).parse(input)?;
    Ok((
        rest,
        PayloadHeader {
            pool_id: PoolId(pool_id),
            data_length,
        },
    ))
}

/// Parse `n` consecutive values
pub fn parse_values<T: DatapointValue>(input: &[u8], n: usize) -> IResult<&[u8], Vec<T>> {
    count(T::parse, n).parse(input)
}

/// A snapshot of one subscription range, held in a pool block
pub struct Payload {
    pool: Arc<dyn BufferPool>,
    block: Option<Vec<u8>>,
    family: Family,
}

impl Payload {
    /// Lay `values` out in `block`. A block too small for them goes straight
    /// back to `pool`.
    pub(crate) fn fill<F: FamilyKind>(
        pool: Arc<dyn BufferPool>,
        mut block: Vec<u8>,
        values: &[F::Value],
    ) -> Result<Self, DatastoreError> {
        let size = <F::Value as DatapointValue>::SIZE;
        let data_length = values.len() * size;
        if block.len() < HEADER_LEN + data_length {
            pool.free(block);
            return Err(DatastoreError::InvalidArg("payload block too small"));
        }
        block[..HEADER_WORD].copy_from_slice(&pool.id().0.to_ne_bytes());
        block[HEADER_WORD..HEADER_LEN].copy_from_slice(&data_length.to_ne_bytes());
        for (value, slot) in values
            .iter()
            .zip(block[HEADER_LEN..HEADER_LEN + data_length].chunks_exact_mut(size))
        {
            value.encode(slot);
        }
        Ok(Payload {
            pool,
            block: Some(block),
            family: F::FAMILY,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.block.as_deref().unwrap_or_default()
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn header(&self) -> Result<PayloadHeader, DatastoreError> {
        Ok(parse_header(self.bytes())?.1)
    }

    pub fn pool_id(&self) -> PoolId {
        self.header()
            .map(|h| h.pool_id)
            .unwrap_or_else(|_| self.pool.id())
    }

    /// Bytes of value data following the header
    pub fn data_length(&self) -> usize {
        self.header().map(|h| h.data_length).unwrap_or(0)
    }

    pub fn value_count(&self) -> usize {
        let size = with_family!(self.family, F => <<F as FamilyKind>::Value as DatapointValue>::SIZE);
        self.data_length() / size
    }

    /// Header and values, without the unused tail of the block
    pub fn as_bytes(&self) -> &[u8] {
        let end = (HEADER_LEN + self.data_length()).min(self.bytes().len());
        &self.bytes()[..end]
    }

    /// Decode the values as family `F`
    pub fn values<F: FamilyKind>(&self) -> Result<Vec<F::Value>, DatastoreError> {
        if F::FAMILY != self.family {
            return Err(DatastoreError::InvalidArg("payload family mismatch"));
        }
        let (rest, header) = parse_header(self.bytes())?;
        let size = <F::Value as DatapointValue>::SIZE;
        let (_, values) = parse_values::<F::Value>(rest, header.data_length / size)?;
        Ok(values)
    }

    /// Decode the values as whatever family produced them
    pub fn to_family_values(&self) -> Result<FamilyValues, DatastoreError> {
        with_family!(self.family, F => self.values::<F>().map(F::wrap))
    }

    /// Hand the block back to its pool now
    pub fn release(mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if let Some(block) = self.block.take() {
            self.pool.free(block);
        }
    }
}

impl Drop for Payload {
    fn drop(&mut self) {
        self.give_back();
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("family", &self.family)
            .field("pool", &self.pool.id())
            .field("data_length", &self.data_length())
            .finish()
    }
}
