// ECG Telemetry — Wire Formats
//
// Binary batch: little-endian u16 per sample, N×2 bytes, leads-off as 0.
// Text:         ASCII decimal of the single sample, or "Leads Off".
//
// The decode half is what a listening client does with a notification.

use anyhow::{anyhow, bail};

use crate::events::{Reading, Sample};

pub const LEADS_OFF_TEXT: &str = "Leads Off";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    BinaryBatch,
    Text,
}

impl WireFormat {
    /// Largest payload `capacity` readings can encode to.
    pub fn max_payload_len(self, capacity: usize) -> usize {
        match self {
            Self::BinaryBatch => capacity * 2,
            // "Leads Off" is longer than any u16 in decimal.
            Self::Text => LEADS_OFF_TEXT.len(),
        }
    }

    /// Serialize `readings` into `out`, replacing its previous contents.
    pub fn encode(self, readings: &[Reading], out: &mut Vec<u8>) {
        out.clear();
        match self {
            Self::BinaryBatch => encode_batch(readings, out),
            Self::Text => {
                if let Some(&last) = readings.last() {
                    encode_text(last, out);
                }
            }
        }
    }
}

pub fn encode_batch(readings: &[Reading], out: &mut Vec<u8>) {
    out.reserve(readings.len() * 2);
    for reading in readings {
        out.extend_from_slice(&reading.sample().to_le_bytes());
    }
}

pub fn encode_text(reading: Reading, out: &mut Vec<u8>) {
    match reading {
        Reading::LeadsOff => out.extend_from_slice(LEADS_OFF_TEXT.as_bytes()),
        Reading::Value(v) => out.extend_from_slice(v.to_string().as_bytes()),
    }
}

// ---------------------------------------------------------------------------
// Receiving side
// ---------------------------------------------------------------------------

pub fn decode_batch(payload: &[u8]) -> anyhow::Result<Vec<Sample>> {
    if payload.len() % 2 != 0 {
        bail!("batch payload has odd length {}", payload.len());
    }
    Ok(payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn decode_text(payload: &[u8]) -> anyhow::Result<Reading> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| anyhow!("text payload is not UTF-8: {}", e))?
        .trim();
    if text == LEADS_OFF_TEXT {
        return Ok(Reading::LeadsOff);
    }
    text.parse::<Sample>()
        .map(Reading::Value)
        .map_err(|e| anyhow!("could not decode {:?} as a sample: {}", text, e))
}

/// ADC counts to volts the way the plotting clients scale them.
pub fn counts_to_volts(counts: Sample, full_scale: f32, reference_v: f32) -> f32 {
    counts as f32 / full_scale * reference_v
}
