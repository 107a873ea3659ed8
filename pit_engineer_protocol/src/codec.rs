// Big-endian field codec.
//
// `WireWriter` and `WireReader` are the only places that know about byte
// order and the one-byte length prefix for names. Every payload type
// implements `Wire` on top of them, so `message.rs` only deals with opcodes
// and composition.
//
// Decoding is lenient about trailing bytes: a reader stops once it has the
// fields it knows. Truncation, oversized names, and bad UTF-8 are errors.

use crate::error::CodecError;

/// Encode/decode a value as a run of wire fields (no opcode, no framing).
pub(crate) trait Wire: Sized {
    fn write(&self, w: &mut WireWriter) -> Result<(), CodecError>;
    fn read(r: &mut WireReader<'_>) -> Result<Self, CodecError>;
}

/// Append-only big-endian buffer.
#[derive(Default)]
pub(crate) struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// One length byte, then the UTF-8 bytes.
    pub fn put_name(&mut self, name: &str) -> Result<(), CodecError> {
        let len = u8::try_from(name.len()).map_err(|_| CodecError::NameTooLong {
            len: name.len(),
        })?;
        self.put_u8(len);
        self.put_bytes(name.as_bytes());
        Ok(())
    }

    /// One count byte for a list that is about to be written.
    pub fn put_count(&mut self, what: &'static str, count: usize) -> Result<(), CodecError> {
        let count = u8::try_from(count).map_err(|_| CodecError::TooManyEntries { what, count })?;
        self.put_u8(count);
        Ok(())
    }
}

/// Cursor over a received payload.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.take_array()?))
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn get_f32(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    /// Any non-zero byte reads as `true`.
    pub fn get_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_fixed<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        self.take_array()
    }

    pub fn get_name(&mut self, context: &'static str) -> Result<String, CodecError> {
        let len = usize::from(self.get_u8()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8 { context })
    }
}
