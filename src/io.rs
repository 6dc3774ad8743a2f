//! Binary encode/decode traits, generalized from the teacher's
//! `Encodeable`/`Decodeable` pair in `io.rs`. Every on-disk and
//! on-wire structure in this crate (page bodies, log records, sorted
//! run entries) implements these rather than going through `serde`:
//! the external interfaces section pins down exact byte layouts
//! (field order, fixed widths, big/little endian choices), which a
//! hand-written codec expresses more directly than a derive macro.

use std::convert::TryInto;
use std::io::Read;
use std::mem::size_of;

pub trait Encodeable {
    fn encode(&self) -> Vec<u8>;
}

pub trait Decodeable: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> std::io::Result<Self>;
}

pub fn read_exact_vec<R: Read>(reader: &mut R, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

macro_rules! impl_le_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }

            impl Decodeable for $t {
                fn decode_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
                    let bytes = read_exact_vec(reader, size_of::<Self>())?;
                    Ok(Self::from_le_bytes(bytes.try_into().unwrap()))
                }
            }
        )*
    }
}

impl_le_serialization!(for u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl Encodeable for bool {
    fn encode(&self) -> Vec<u8> {
        vec![*self as u8]
    }
}

impl Decodeable for bool {
    fn decode_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        Ok(u8::decode_from(reader)? != 0)
    }
}

/// Length-prefixed byte string: `len(u32 LE) | bytes`.
impl Encodeable for Vec<u8> {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.len());
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        buf.extend_from_slice(self);
        buf
    }
}

impl Decodeable for Vec<u8> {
    fn decode_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let len = u32::decode_from(reader)? as usize;
        read_exact_vec(reader, len)
    }
}

impl Encodeable for String {
    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec().encode()
    }
}

impl Decodeable for String {
    fn decode_from<R: Read>(reader: &mut R) -> std::io::Result<Self> {
        let bytes = Vec::<u8>::decode_from(reader)?;
        String::from_utf8(bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn write<T: Encodeable>(&mut self, value: &T) -> &mut Self {
        self.buf.extend_from_slice(&value.encode());
        self
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Default for ByteWriter {
    fn default() -> Self {
        Self::new()
    }
}
