//! Logging blocks and streamed sample layout

use crate::error::{CrtpError, Result};

use super::element::TocElement;

/// Vehicle logging period unit per second (periods are in tenths of a millisecond)
const PERIOD_UNITS_PER_SECOND: f64 = 10_000.0;

/// Device-side group of log variables sampled together
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingBlock {
    pub name: String,
    pub id: u8,
    pub frequency: f64,
    pub period_tenths_ms: u8,
    /// Element ids in registration order; fixes the sample byte layout
    pub members: Vec<u8>,
    /// Vehicle timestamp of the last applied sample
    pub last_timestamp_ms: Option<u32>,
}

impl LoggingBlock {
    pub fn new(name: impl Into<String>, id: u8, frequency: f64, period_tenths_ms: u8) -> Self {
        Self {
            name: name.into(),
            id,
            frequency,
            period_tenths_ms,
            members: Vec::new(),
            last_timestamp_ms: None,
        }
    }

    /// Split the value bytes of one sample over the members
    ///
    /// Nothing is returned unless every member decodes, so a bad sample never
    /// leaves a partial update behind.
    ///
    /// # Returns
    ///
    /// `(element_id, stored_bytes)` for every member, in member order.
    ///
    /// # Errors
    ///
    /// Returns error if a member is not in `elements`, has a type without a
    /// known width, or if `values` is shorter than the block layout.
    pub fn decode_sample(&self, values: &[u8], elements: &[TocElement]) -> Result<Vec<(u8, Vec<u8>)>> {
        let mut decoded = Vec::with_capacity(self.members.len());
        let mut offset = 0;

        for &member in &self.members {
            let element = elements
                .iter()
                .find(|e| e.id == member)
                .ok_or_else(|| CrtpError::UnknownElement(format!("log id {} in block {}", member, self.name)))?;

            let kind = element.kind().ok_or_else(|| {
                CrtpError::Protocol(format!(
                    "{} has type 0x{:02X} with no known width",
                    element.full_name(),
                    element.type_tag
                ))
            })?;

            let raw = values
                .get(offset..)
                .and_then(|rest| kind.decode_wire(rest))
                .ok_or_else(|| {
                    CrtpError::Decode(format!(
                        "Sample for block {} too short: {} bytes, {} needed at {}",
                        self.name,
                        values.len(),
                        offset + kind.wire_width(),
                        element.full_name()
                    ))
                })?;

            decoded.push((member, raw));
            offset += kind.wire_width();
        }

        Ok(decoded)
    }
}

/// Convert a sampling frequency into the vehicle's period unit
///
/// The period is rounded to the nearest tenth of a millisecond and clamped
/// to what fits in one byte.
pub fn period_for_frequency(frequency: f64) -> Result<u8> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(CrtpError::InvalidFrequency(frequency));
    }

    let period = (PERIOD_UNITS_PER_SECOND / frequency).round();
    Ok(period.clamp(1.0, u8::MAX as f64) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(members: &[u8]) -> LoggingBlock {
        let mut block = LoggingBlock::new("test", 0, 100.0, 100);
        block.members = members.to_vec();
        block
    }

    fn elements() -> Vec<TocElement> {
        vec![
            TocElement::new(0, 0x01, "a", "u8"),
            TocElement::new(1, 0x07, "a", "f32"),
            TocElement::new(2, 0x05, "a", "i16"),
            TocElement::new(3, 0x0F, "a", "odd"),
        ]
    }

    #[test]
    fn test_decode_sample_offsets() {
        let block = block_with(&[0, 1, 2]);
        let mut values = vec![0x2A];
        values.extend_from_slice(&2.5f32.to_le_bytes());
        values.extend_from_slice(&(-3i16).to_le_bytes());
        assert_eq!(values.len(), 7);

        let decoded = block.decode_sample(&values, &elements()).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0], (0, values[0..1].to_vec()));
        assert_eq!(decoded[1], (1, values[1..5].to_vec()));
        assert_eq!(decoded[2], (2, values[5..7].to_vec()));
    }

    #[test]
    fn test_decode_sample_too_short() {
        let block = block_with(&[0, 1, 2]);
        let result = block.decode_sample(&[0x2A, 0, 0, 0x20, 0x40, 0xFD], &elements());
        assert!(matches!(result, Err(CrtpError::Decode(_))));
    }

    #[test]
    fn test_decode_sample_unknown_width() {
        let block = block_with(&[0, 3]);
        let result = block.decode_sample(&[1, 2, 3, 4, 5], &elements());
        assert!(matches!(result, Err(CrtpError::Protocol(_))));
    }

    #[test]
    fn test_decode_sample_unknown_member() {
        let block = block_with(&[9]);
        assert!(block.decode_sample(&[1, 2, 3, 4], &elements()).is_err());
    }

    #[test]
    fn test_decode_sample_empty_block() {
        let block = block_with(&[]);
        assert!(block.decode_sample(&[], &elements()).unwrap().is_empty());
    }

    #[test]
    fn test_period_for_frequency() {
        assert_eq!(period_for_frequency(100.0).unwrap(), 100);
        assert_eq!(period_for_frequency(1000.0).unwrap(), 10);
        assert_eq!(period_for_frequency(333.0).unwrap(), 30);
        assert_eq!(period_for_frequency(10.0).unwrap(), 255);
        assert_eq!(period_for_frequency(1_000_000.0).unwrap(), 1);
    }

    #[test]
    fn test_period_rejects_invalid_frequency() {
        assert!(matches!(period_for_frequency(0.0), Err(CrtpError::InvalidFrequency(_))));
        assert!(period_for_frequency(-5.0).is_err());
        assert!(period_for_frequency(f64::NAN).is_err());
        assert!(period_for_frequency(f64::INFINITY).is_err());
    }
}
