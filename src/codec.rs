//! Register word conversion.
//!
//! Meters publish a value as one or two big-endian 16-bit words plus a fixed scale.
//! Signed values use a sign-magnitude convention on the top bit of the first word:
//! the whole magnitude (sign bit included) is scaled and then negated. This matches
//! what the supported meters emit; it is not two's complement.

use crate::error::{MeterError, Result};
use crate::models::{ActuatorDescriptor, RegisterDescriptor};

pub struct RegisterCodec;

impl RegisterCodec {
    const WORD_RADIX: f64 = 65536.0;
    const SIGN_BIT: u16 = 0x8000;

    /// Assembles `words` most significant first, scales, and negates when `signed` and
    /// bit 15 of the first word is set.
    pub fn decode(words: &[u16], scale: f64, signed: bool) -> f64 {
        let mut value = words
            .iter()
            .fold(0.0, |acc, word| acc * Self::WORD_RADIX + f64::from(*word));
        value *= scale;
        if signed && words.first().is_some_and(|w| w / Self::SIGN_BIT == 1) {
            value = -value;
        }
        value
    }

    /// Decodes a read against its descriptor, checking the word count first.
    pub fn decode_register(descriptor: &RegisterDescriptor, words: &[u16]) -> Result<f64> {
        if words.len() != usize::from(descriptor.length) {
            return Err(MeterError::Decode(format!(
                "expected {} words at 0x{:04x}, got {}",
                descriptor.length,
                descriptor.address,
                words.len()
            )));
        }
        Ok(Self::decode(words, descriptor.scale, descriptor.signed))
    }

    /// Maps a raw status word onto on/off. Anything but the two published values is an
    /// error, never a default.
    pub fn decode_status(actuator: &ActuatorDescriptor, raw: u16) -> Result<bool> {
        if raw == actuator.on_status {
            Ok(true)
        } else if raw == actuator.off_status {
            Ok(false)
        } else {
            Err(MeterError::Decode(format!(
                "bad register value 0x{raw:04x} at 0x{:04x}",
                actuator.status_address
            )))
        }
    }
}
