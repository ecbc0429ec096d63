//! Little-endian, naturally-aligned event decoding helpers (spec §4.E step
//! 3: "Deserializes (little-endian, naturally aligned as declared)").

use crate::error::AgentError;
use crate::probe::event::BaseEventProperties;
use crate::span::SpanContext;

/// A read cursor over one raw probe event. Probe-specific payload decoders
/// use this after the shared base properties have been consumed.
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], AgentError> {
        let end = self.pos + n;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| AgentError::AttachFailed("truncated event record".into()))?;
        self.pos = end;
        Ok(slice)
    }

    pub fn u64(&mut self) -> Result<u64, AgentError> {
        let s = self.take(8)?;
        Ok(u64::from_le_bytes(s.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Result<i64, AgentError> {
        Ok(self.u64()? as i64)
    }

    pub fn i32(&mut self) -> Result<i32, AgentError> {
        let s = self.take(4)?;
        Ok(i32::from_le_bytes(s.try_into().unwrap()))
    }

    pub fn u16(&mut self) -> Result<u16, AgentError> {
        let s = self.take(2)?;
        Ok(u16::from_le_bytes(s.try_into().unwrap()))
    }

    pub fn u8(&mut self) -> Result<u8, AgentError> {
        let s = self.take(1)?;
        Ok(s[0])
    }

    pub fn bytes16(&mut self) -> Result<[u8; 16], AgentError> {
        let s = self.take(16)?;
        Ok(s.try_into().unwrap())
    }

    pub fn bytes8(&mut self) -> Result<[u8; 8], AgentError> {
        let s = self.take(8)?;
        Ok(s.try_into().unwrap())
    }

    /// Reads a fixed-size buffer of `width` bytes holding a NUL-terminated
    /// (or fully-used) UTF-8 string, the convention in-kernel probes use for
    /// bounded string fields (no dynamic allocation in kernel context).
    pub fn fixed_str(&mut self, width: usize) -> Result<String, AgentError> {
        let s = self.take(width)?;
        let end = s.iter().position(|&b| b == 0).unwrap_or(s.len());
        Ok(String::from_utf8_lossy(&s[..end]).into_owned())
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }
}

/// Decode the shared `{start, end, current, parent}` prefix every event
/// carries (spec §3 "Base span properties").
pub fn decode_base(cursor: &mut Cursor<'_>) -> Result<BaseEventProperties, AgentError> {
    let start_unix_nano = cursor.u64()?;
    let end_unix_nano = cursor.u64()?;

    let current_trace_id = cursor.bytes16()?;
    let current_span_id = cursor.bytes8()?;
    let current_flags = cursor.u8()?;

    let parent_span_id = cursor.bytes8()?;
    let parent_flags = cursor.u8()?;

    let current = SpanContext {
        trace_id: current_trace_id,
        span_id: current_span_id,
        flags: current_flags,
        remote: false,
    };
    let parent = if parent_span_id == [0u8; 8] {
        SpanContext::INVALID
    } else {
        SpanContext {
            trace_id: current_trace_id,
            span_id: parent_span_id,
            flags: parent_flags,
            remote: false,
        }
    };

    Ok(BaseEventProperties {
        start_unix_nano,
        end_unix_nano,
        current,
        parent,
    })
}
