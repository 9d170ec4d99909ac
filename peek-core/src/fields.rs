use serde::Serialize;

/// A single header value tagged with its on-disk width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FieldValue {
    Byte(u8),
    Word(u16),
    Dword(u32),
    Qword(u64),
}

impl FieldValue {
    /// Returns the value widened to `u64`.
    pub fn as_u64(&self) -> u64 {
        match *self {
            FieldValue::Byte(v) => v as u64,
            FieldValue::Word(v) => v as u64,
            FieldValue::Dword(v) => v as u64,
            FieldValue::Qword(v) => v,
        }
    }

    /// Returns the little-endian bytes of the value at its on-disk width.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match *self {
            FieldValue::Byte(v) => vec![v],
            FieldValue::Word(v) => v.to_le_bytes().to_vec(),
            FieldValue::Dword(v) => v.to_le_bytes().to_vec(),
            FieldValue::Qword(v) => v.to_le_bytes().to_vec(),
        }
    }

    /// Width of the value in bytes.
    pub fn width(&self) -> usize {
        match self {
            FieldValue::Byte(_) => 1,
            FieldValue::Word(_) => 2,
            FieldValue::Dword(_) => 4,
            FieldValue::Qword(_) => 8,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::Byte(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Word(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Dword(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Qword(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: &'static str,
    pub value: FieldValue,
}

impl Field {
    pub fn new(name: &'static str, value: impl Into<FieldValue>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// Ordered, named view over the numeric fields of a header.
pub trait Fields {
    fn fields(&self) -> Vec<Field>;
}
