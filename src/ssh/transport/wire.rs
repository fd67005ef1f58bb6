//! SSH data type encoding (RFC 4251 §5).

use super::TransportError;

/// Append-only encoder for SSH payloads.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a payload with its message number.
    pub fn message(msg: u8) -> Self {
        let mut w = Self::new();
        w.put_u8(msg);
        w
    }

    pub fn put_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn put_bool(&mut self, value: bool) -> &mut Self {
        self.put_u8(value as u8)
    }

    pub fn put_u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_u64(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn put_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn put_string(&mut self, bytes: &[u8]) -> &mut Self {
        self.put_u32(bytes.len() as u32);
        self.put_raw(bytes)
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.put_string(value.as_bytes())
    }

    pub fn put_name_list<S: AsRef<str>>(&mut self, names: &[S]) -> &mut Self {
        let joined = names
            .iter()
            .map(|name| name.as_ref())
            .collect::<Vec<_>>()
            .join(",");
        self.put_str(&joined)
    }

    /// Writes an unsigned big-endian magnitude as an mpint.
    pub fn put_mpint(&mut self, magnitude: &[u8]) -> &mut Self {
        let encoded = mpint_bytes(magnitude);
        self.put_string(&encoded)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Body of an mpint for a non-negative magnitude: leading zeros stripped, and a zero byte
/// prepended when the high bit is set.
pub fn mpint_bytes(magnitude: &[u8]) -> Vec<u8> {
    let start = magnitude
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(magnitude.len());
    let trimmed = &magnitude[start..];
    let mut out = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.first().is_some_and(|b| b & 0x80 != 0) {
        out.push(0);
    }
    out.extend_from_slice(trimmed);
    out
}

/// Cursor over a received payload.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, len: usize) -> Result<&'a [u8], TransportError> {
        if self.remaining() < len {
            return Err(TransportError::Malformed(format!(
                "needed {len} bytes, {} left",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8, TransportError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, TransportError> {
        Ok(self.u8()? != 0)
    }

    pub fn u32(&mut self) -> Result<u32, TransportError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, TransportError> {
        let bytes = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn string(&mut self) -> Result<&'a [u8], TransportError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    pub fn utf8(&mut self) -> Result<String, TransportError> {
        let bytes = self.string()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn name_list(&mut self) -> Result<Vec<String>, TransportError> {
        let raw = self.string()?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let text = std::str::from_utf8(raw)
            .map_err(|_| TransportError::Malformed("name-list is not valid UTF-8".into()))?;
        Ok(text.split(',').map(str::to_string).collect())
    }

    /// Reads an mpint and returns its magnitude with the sign padding stripped.
    /// Negative values are rejected; SSH never sends them in the exchanges used here.
    pub fn mpint(&mut self) -> Result<&'a [u8], TransportError> {
        let raw = self.string()?;
        if raw.first().is_some_and(|b| b & 0x80 != 0) {
            return Err(TransportError::Malformed("negative mpint".into()));
        }
        let start = raw.iter().position(|&b| b != 0).unwrap_or(raw.len());
        Ok(&raw[start..])
    }
}
