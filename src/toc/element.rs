//! TOC elements and their typed values

use std::fmt;

use crate::crtp::protocol::TocItem;

/// Parameter type-tag bit marking the element as read-only
pub const READ_ONLY_FLAG: u8 = 0x40;

/// Mask selecting the primitive kind from a type tag
const KIND_MASK: u8 = 0x0F;

/// Primitive value kinds a TOC element can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    U8,
    U16,
    U32,
    I8,
    I16,
    I32,
    F32,
    /// Half precision on the wire, stored widened to `F32`
    F16,
}

impl ValueKind {
    /// Kind selected by the low nibble of `type_tag`, if known
    pub fn from_type_tag(type_tag: u8) -> Option<Self> {
        match type_tag & KIND_MASK {
            1 => Some(Self::U8),
            2 => Some(Self::U16),
            3 => Some(Self::U32),
            4 => Some(Self::I8),
            5 => Some(Self::I16),
            6 => Some(Self::I32),
            7 => Some(Self::F32),
            8 => Some(Self::F16),
            _ => None,
        }
    }

    pub fn type_tag(self) -> u8 {
        match self {
            Self::U8 => 1,
            Self::U16 => 2,
            Self::U32 => 3,
            Self::I8 => 4,
            Self::I16 => 5,
            Self::I32 => 6,
            Self::F32 => 7,
            Self::F16 => 8,
        }
    }

    /// Number of bytes the value occupies on the wire
    pub fn wire_width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 | Self::F16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
        }
    }

    /// Kind of the bytes kept in the element cache
    pub fn stored(self) -> Self {
        match self {
            Self::F16 => Self::F32,
            other => other,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::U16 => "u16",
            Self::U32 => "u32",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::F16 => "f16",
        }
    }

    /// Convert wire bytes into the stored representation
    ///
    /// Returns `None` if `bytes` is shorter than the wire width. Extra bytes
    /// are ignored.
    pub fn decode_wire(self, bytes: &[u8]) -> Option<Vec<u8>> {
        let bytes = bytes.get(..self.wire_width())?;
        match self {
            Self::F16 => Some(f16_to_f32(u16::from_le_bytes([bytes[0], bytes[1]])).to_le_bytes().to_vec()),
            _ => Some(bytes.to_vec()),
        }
    }

    /// Interpret stored bytes as `f64`, whatever the kind
    pub fn stored_as_f64(self, raw: &[u8]) -> Option<f64> {
        Some(match self.stored() {
            Self::U8 => u8::decode_le(raw)? as f64,
            Self::U16 => u16::decode_le(raw)? as f64,
            Self::U32 => u32::decode_le(raw)? as f64,
            Self::I8 => i8::decode_le(raw)? as f64,
            Self::I16 => i16::decode_le(raw)? as f64,
            Self::I32 => i32::decode_le(raw)? as f64,
            Self::F32 | Self::F16 => f32::decode_le(raw)? as f64,
        })
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Widen an IEEE-754 binary16 value to `f32`
///
/// Sign is moved to bit 31, the exponent is rebiased from 15 to 127 and the
/// mantissa is padded with 13 zero bits. Subnormals are normalised, infinities
/// and NaN payloads are preserved.
///
/// No vehicle variable of this kind has been checked against real hardware,
/// so the byte order of incoming half floats is assumed to match the other
/// little-endian values.
pub fn f16_to_f32(half: u16) -> f32 {
    let sign = ((half >> 15) as u32) << 31;
    let exponent = ((half >> 10) & 0x1F) as u32;
    let mantissa = (half & 0x03FF) as u32;

    let bits = match (exponent, mantissa) {
        (0, 0) => sign,
        (0, _) => {
            let mut exponent = 127 - 15 + 1;
            let mut mantissa = mantissa;
            while mantissa & 0x0400 == 0 {
                mantissa <<= 1;
                exponent -= 1;
            }
            sign | (exponent << 23) | ((mantissa & 0x03FF) << 13)
        }
        (0x1F, _) => sign | (0xFF << 23) | (mantissa << 13),
        _ => sign | ((exponent + 127 - 15) << 23) | (mantissa << 13),
    };

    f32::from_bits(bits)
}

/// Rust types a TOC value can be read as or written from
pub trait TocValue: Copy + Sized {
    const KIND: ValueKind;

    /// Decode from little-endian bytes; `None` if too short
    fn decode_le(bytes: &[u8]) -> Option<Self>;

    fn encode_le(self) -> Vec<u8>;
}

macro_rules! impl_toc_value {
    ($($ty:ty => $kind:ident),* $(,)?) => {
        $(
            impl TocValue for $ty {
                const KIND: ValueKind = ValueKind::$kind;

                fn decode_le(bytes: &[u8]) -> Option<Self> {
                    let bytes = bytes.get(..std::mem::size_of::<$ty>())?;
                    Some(<$ty>::from_le_bytes(bytes.try_into().ok()?))
                }

                fn encode_le(self) -> Vec<u8> {
                    self.to_le_bytes().to_vec()
                }
            }
        )*
    };
}

impl_toc_value! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    f32 => F32,
}

/// One named variable or parameter advertised by the vehicle
#[derive(Debug, Clone, PartialEq)]
pub struct TocElement {
    pub id: u8,
    pub type_tag: u8,
    pub group: String,
    pub name: String,
    raw: Option<Vec<u8>>,
}

impl TocElement {
    pub fn new(id: u8, type_tag: u8, group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            type_tag,
            group: group.into(),
            name: name.into(),
            raw: None,
        }
    }

    /// `group.name`
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    /// Exact comparison with `group.name`; either part may contain dots
    pub fn matches(&self, full_name: &str) -> bool {
        full_name
            .strip_prefix(self.group.as_str())
            .and_then(|rest| rest.strip_prefix('.'))
            .map_or(false, |name| name == self.name)
    }

    pub fn kind(&self) -> Option<ValueKind> {
        ValueKind::from_type_tag(self.type_tag)
    }

    /// Only meaningful for parameters
    pub fn is_read_only(&self) -> bool {
        self.type_tag & READ_ONLY_FLAG != 0
    }

    /// Last known value in stored representation
    pub fn raw(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub fn has_value(&self) -> bool {
        self.raw.is_some()
    }

    pub(crate) fn store(&mut self, raw: Vec<u8>) {
        self.raw = Some(raw);
    }
}

impl From<TocItem> for TocElement {
    fn from(item: TocItem) -> Self {
        Self::new(item.id, item.type_tag, item.group, item.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_type_tag() {
        assert_eq!(ValueKind::from_type_tag(0x07), Some(ValueKind::F32));
        assert_eq!(ValueKind::from_type_tag(0x48), Some(ValueKind::F16));
        assert_eq!(ValueKind::from_type_tag(0x41), Some(ValueKind::U8));
        assert_eq!(ValueKind::from_type_tag(0x00), None);
        assert_eq!(ValueKind::from_type_tag(0x09), None);
    }

    #[test]
    fn test_wire_widths() {
        let widths: Vec<usize> = (1..=8)
            .filter_map(ValueKind::from_type_tag)
            .map(ValueKind::wire_width)
            .collect();
        assert_eq!(widths, vec![1, 2, 4, 1, 2, 4, 4, 2]);
    }

    #[test]
    fn test_type_tag_round_trip() {
        for tag in 1..=8 {
            assert_eq!(ValueKind::from_type_tag(tag).unwrap().type_tag(), tag);
        }
    }

    #[test]
    fn test_read_only_flag() {
        assert!(TocElement::new(1, 0x41, "firmware", "revision").is_read_only());
        assert!(!TocElement::new(0, 0x07, "stabilizer", "roll").is_read_only());
    }

    #[test]
    fn test_full_name_matching() {
        let element = TocElement::new(0, 0x07, "stabilizer", "roll");
        assert_eq!(element.full_name(), "stabilizer.roll");
        assert!(element.matches("stabilizer.roll"));
        assert!(!element.matches("stabilizer.rol"));
        assert!(!element.matches("stabilizer"));
        assert!(!element.matches("roll"));
    }

    #[test]
    fn test_full_name_matching_dotted_group() {
        let element = TocElement::new(0, 0x07, "ctrl.pid", "kp");
        assert!(element.matches(&element.full_name()));
        assert!(element.matches("ctrl.pid.kp"));
        assert!(!element.matches("ctrl.pidkp"));
        assert!(!element.matches("ctrl.pid.kp.x"));

        let dotted_name = TocElement::new(1, 0x07, "ctrl", "pid.kp");
        assert!(dotted_name.matches("ctrl.pid.kp"));
        assert!(!dotted_name.matches("ctrl.pid"));
    }

    #[test]
    fn test_toc_value_little_endian() {
        assert_eq!(0x1234u16.encode_le(), vec![0x34, 0x12]);
        assert_eq!(i16::decode_le(&[0xFE, 0xFF]), Some(-2));
        assert_eq!(f32::decode_le(&1.5f32.to_le_bytes()), Some(1.5));
        assert_eq!(u32::decode_le(&[1, 2, 3]), None);
    }

    #[test]
    fn test_decode_wire_rejects_short_input() {
        assert_eq!(ValueKind::I32.decode_wire(&[1, 2, 3]), None);
        assert_eq!(ValueKind::I32.decode_wire(&[1, 0, 0, 0, 9]), Some(vec![1, 0, 0, 0]));
    }

    #[test]
    fn test_stored_as_f64() {
        assert_eq!(ValueKind::I8.stored_as_f64(&[0xFF]), Some(-1.0));
        assert_eq!(ValueKind::U16.stored_as_f64(&[0x10, 0x27]), Some(10_000.0));
        assert_eq!(ValueKind::F32.stored_as_f64(&[]), None);
    }

    // Half-float widening has not been checked against a live vehicle;
    // these only pin the IEEE-754 conversion itself.
    #[test]
    fn test_f16_widening_unverified() {
        assert_eq!(f16_to_f32(0x3C00), 1.0);
        assert_eq!(f16_to_f32(0xC000), -2.0);
        assert_eq!(f16_to_f32(0x7BFF), 65504.0);
        assert_eq!(f16_to_f32(0x0001), 2f32.powi(-24));
        assert_eq!(f16_to_f32(0x8000).to_bits(), 0x8000_0000);
        assert!(f16_to_f32(0x7C00).is_infinite());
        assert!(f16_to_f32(0x7E00).is_nan());
    }

    #[test]
    fn test_f16_stored_widened_unverified() {
        let raw = ValueKind::F16.decode_wire(&[0x00, 0x3C]).unwrap();
        assert_eq!(raw.len(), 4);
        assert_eq!(f32::decode_le(&raw), Some(1.0));
        assert_eq!(ValueKind::F16.stored(), ValueKind::F32);
    }
}
