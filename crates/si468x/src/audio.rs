//! Digital audio output configuration.
//!
//! The chip's I2S port is set up entirely through properties: the pin
//! configuration, DIGITAL_IO_OUTPUT_SAMPLE_RATE and the packed
//! DIGITAL_IO_OUTPUT_FORMAT word (mode in bits 3:0, slot size in bits 7:4,
//! sample size in bits 13:8). The format word may only change before the
//! first tune after boot.

use std::fmt;
use std::str::FromStr;

use si468x_core::{Error, Result};
use tracing::debug;

use crate::device::Session;
use crate::properties::{
    DIGITAL_IO_OUTPUT_FORMAT, DIGITAL_IO_OUTPUT_SAMPLE_RATE, PIN_CONFIG_ENABLE, PIN_I2S_ENABLED,
};

const MODE_MASK: u16 = 0x000f;
const SLOT_SHIFT: u16 = 4;
const SAMPLE_SHIFT: u16 = 8;
const WIDTH_MASK: u16 = (0xf << SLOT_SHIFT) | (0x3f << SAMPLE_SHIFT);

/// Widest sample the port carries; wider requests are truncated.
const MAX_SAMPLE_WIDTH: u8 = 24;

/// Digital audio interface framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AudioFormat {
    #[default]
    I2s,
    DspA,
    DspB,
    LeftJustified,
    RightJustified,
}

impl AudioFormat {
    /// Mode field of DIGITAL_IO_OUTPUT_FORMAT.
    pub fn mode(self) -> u16 {
        match self {
            AudioFormat::I2s => 0x0,
            AudioFormat::DspA => 0x6,
            AudioFormat::DspB => 0x7,
            AudioFormat::LeftJustified => 0x8,
            AudioFormat::RightJustified => 0x9,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AudioFormat::I2s => "i2s",
            AudioFormat::DspA => "dsp-a",
            AudioFormat::DspB => "dsp-b",
            AudioFormat::LeftJustified => "left-j",
            AudioFormat::RightJustified => "right-j",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string names no [`AudioFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAudioFormatError(String);

impl fmt::Display for ParseAudioFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown audio format: '{}'", self.0)
    }
}

impl std::error::Error for ParseAudioFormatError {}

impl FromStr for AudioFormat {
    type Err = ParseAudioFormatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "i2s" => Ok(AudioFormat::I2s),
            "dsp-a" | "dsp_a" => Ok(AudioFormat::DspA),
            "dsp-b" | "dsp_b" => Ok(AudioFormat::DspB),
            "left-j" | "left_j" => Ok(AudioFormat::LeftJustified),
            "right-j" | "right_j" => Ok(AudioFormat::RightJustified),
            _ => Err(ParseAudioFormatError(s.to_string())),
        }
    }
}

/// Stream parameters for the digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioParams {
    /// Hz, 32000..=48000.
    pub sample_rate: u32,
    /// Significant bits per sample, at least 8.
    pub sample_width: u8,
    /// Bits each sample occupies on the wire.
    pub slot_width: u8,
}

/// Slot size code for a sample of `width` bits in a `slot`-bit slot.
fn slot_code(width: u8, slot: u8) -> Result<u16> {
    if width == slot {
        return Ok(0);
    }
    match slot {
        8 => Ok(2),
        16 => Ok(4),
        20 => Ok(5),
        24 => Ok(6),
        32 => Ok(7),
        other => Err(Error::InvalidParameter(format!(
            "unsupported slot width {other}"
        ))),
    }
}

impl Session<'_> {
    /// Enable the I2S pins and select the interface framing.
    pub async fn set_audio_format(&mut self, format: AudioFormat) -> Result<()> {
        debug!(%format, "audio format");
        self.set_property(PIN_CONFIG_ENABLE, PIN_I2S_ENABLED).await?;
        self.update_bits(DIGITAL_IO_OUTPUT_FORMAT, MODE_MASK, format.mode())
            .await
    }

    /// Program sample rate, sample width and slot size.
    pub async fn set_audio_params(&mut self, params: &AudioParams) -> Result<()> {
        if !(32_000..=48_000).contains(&params.sample_rate) {
            return Err(Error::InvalidParameter(format!(
                "sample rate {} not supported",
                params.sample_rate
            )));
        }
        if params.sample_width < 8 {
            return Err(Error::InvalidParameter(format!(
                "sample width {} too small",
                params.sample_width
            )));
        }
        let width = params.sample_width.min(MAX_SAMPLE_WIDTH);
        let slot = slot_code(width, params.slot_width)?;

        // Checked above to fit in 16 bits.
        self.set_property(DIGITAL_IO_OUTPUT_SAMPLE_RATE, params.sample_rate as u16)
            .await?;
        let value = (slot << SLOT_SHIFT) | (u16::from(width) << SAMPLE_SHIFT);
        self.update_bits(DIGITAL_IO_OUTPUT_FORMAT, WIDTH_MASK, value)
            .await
    }
}
