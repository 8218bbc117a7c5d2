//! Record streams
//!
//! [`RecordInput`] and [`RecordOutput`] carry the payload bytes of one record.
//! The payload layout belongs to the caller; these types only provide
//! little-endian primitives and length-prefixed strings.
//!
//! ## Encoding
//! ```text
//! integers : little-endian, fixed width
//! bool     : one byte, 0 or 1
//! utf      : [len: u32][UTF-8 bytes]
//! bytes    : [len: u32][raw bytes]
//! ```

use std::io;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StoreError};
use crate::key::Key;
use crate::storage::Storage;

// =============================================================================
// Input
// =============================================================================

/// Reader over a committed record payload
#[derive(Debug, Clone)]
pub struct RecordInput {
    data: Bytes,
}

impl RecordInput {
    pub fn new(data: Bytes) -> Self {
        Self { data }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.remaining()
    }

    pub fn is_empty(&self) -> bool {
        !self.data.has_remaining()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.data.get_u8())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StoreError::Serialization(format!(
                "invalid bool byte {}",
                other
            ))),
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.data.get_i32_le())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.data.get_u32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.data.get_i64_le())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.data.get_u64_le())
    }

    /// Length-prefixed raw bytes
    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        Ok(self.data.split_to(len))
    }

    /// Length-prefixed UTF-8 string
    pub fn read_utf(&mut self) -> Result<String> {
        let raw = self.read_bytes()?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| StoreError::Serialization(format!("invalid UTF-8: {}", e)))
    }

    fn ensure(&self, len: usize) -> Result<()> {
        if self.data.remaining() < len {
            return Err(StoreError::UnexpectedEof);
        }
        Ok(())
    }
}

impl io::Read for RecordInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.data.remaining());
        self.data.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

// =============================================================================
// Output
// =============================================================================

/// Buffering writer for one record
///
/// Nothing is visible to readers until [`commit`](Self::commit). A stream
/// without a target storage (obtained after shutdown) accepts writes and
/// discards them on commit.
pub struct RecordOutput {
    key: Key,
    buf: BytesMut,
    target: Option<Arc<dyn Storage>>,
}

impl RecordOutput {
    pub(crate) fn new(key: Key, target: Option<Arc<dyn Storage>>) -> Self {
        Self {
            key,
            buf: BytesMut::new(),
            target,
        }
    }

    /// Stream that is not attached to any storage
    pub fn detached(key: Key) -> Self {
        Self::new(key, None)
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn is_detached(&self) -> bool {
        self.target.is_none()
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.buf.put_u8(u8::from(v));
    }

    pub fn write_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    /// Length-prefixed raw bytes
    pub fn write_bytes(&mut self, v: &[u8]) -> Result<()> {
        let len = u32::try_from(v.len())
            .map_err(|_| StoreError::Serialization("field longer than u32::MAX".to_string()))?;
        self.buf.put_u32_le(len);
        self.buf.put_slice(v);
        Ok(())
    }

    /// Length-prefixed UTF-8 string
    pub fn write_utf(&mut self, v: &str) -> Result<()> {
        self.write_bytes(v.as_bytes())
    }

    /// Payload written so far, without committing
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    /// Publish the payload under the stream's key
    pub fn commit(self) -> Result<()> {
        match self.target {
            Some(storage) => storage.write(&self.key, self.buf.freeze()),
            None => Ok(()),
        }
    }
}

impl io::Write for RecordOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.put_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Persistence Helpers
// =============================================================================

/// A value that knows how to write itself into a record
pub trait SelfPersistent {
    fn write(&self, out: &mut RecordOutput) -> Result<()>;
}

/// Writes and reconstructs values of one type
pub trait PersistentFactory {
    type Item;

    fn write(&self, item: &Self::Item, out: &mut RecordOutput) -> Result<()>;

    fn read(&self, input: &mut RecordInput) -> Result<Self::Item>;
}

/// Count-prefixed list of strings; position is the integer key of each value
pub fn write_value_list<'a, I>(out: &mut RecordOutput, values: I) -> Result<()>
where
    I: ExactSizeIterator<Item = &'a str>,
{
    let count = u32::try_from(values.len())
        .map_err(|_| StoreError::Serialization("value list too long".to_string()))?;
    out.write_u32(count);
    for value in values {
        out.write_utf(value)?;
    }
    Ok(())
}

/// Inverse of [`write_value_list`]
pub fn read_value_list(input: &mut RecordInput) -> Result<Vec<String>> {
    let count = input.read_u32()? as usize;
    // every entry needs at least its 4-byte length prefix
    if count > input.remaining() / 4 {
        return Err(StoreError::Corruption(format!(
            "value list claims {} entries in {} bytes",
            count,
            input.remaining()
        )));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(input.read_utf()?);
    }
    Ok(values)
}
