//! Broadcast band identification and the external frequency unit.
//!
//! Frequencies crossing the driver boundary are expressed in ticks of
//! 62.5 Hz (16000 ticks per MHz). Conversions to and from hertz use
//! truncating integer division in both directions, so a round trip may lose
//! up to one tick.
//!
//! # Example
//!
//! ```
//! use si468x_core::Band;
//!
//! let tick = si468x_core::band::hz_to_ticks(98_500_000);
//! assert_eq!(Band::from_ticks(tick), Some(Band::Fm));
//! assert_eq!(Band::Fm.to_string(), "FM");
//! ```

use std::fmt;
use std::str::FromStr;

/// Ticks per megahertz (1 tick = 62.5 Hz).
pub const TICKS_PER_MHZ: u32 = 10_000_000 / 625;

/// Convert hertz to 62.5 Hz ticks, truncating.
pub fn hz_to_ticks(hz: u32) -> u32 {
    ((hz as u64 * 10) / 625) as u32
}

/// Convert 62.5 Hz ticks to hertz, truncating.
pub fn ticks_to_hz(ticks: u32) -> u32 {
    ((ticks as u64 * 625) / 10) as u32
}

/// Receiver band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    /// AM broadcast, 520–1710 kHz.
    Am,
    /// FM broadcast, 87.5–107.9 MHz.
    Fm,
    /// DAB Band III, 168.16–239.2 MHz.
    Dab,
}

const ALL_BANDS: &[Band] = &[Band::Am, Band::Fm, Band::Dab];

impl Band {
    /// Returns the band containing the given frequency (in ticks).
    pub fn from_ticks(ticks: u32) -> Option<Band> {
        ALL_BANDS.iter().copied().find(|band| band.contains(ticks))
    }

    /// Lower and upper band edge, inclusive, in ticks.
    pub fn range(&self) -> (u32, u32) {
        match self {
            Band::Am => (8_320, 27_360),
            Band::Fm => (1_400_000, 1_726_400),
            Band::Dab => (2_690_560, 3_827_200),
        }
    }

    /// Returns `true` if `ticks` lies inside this band.
    pub fn contains(&self, ticks: u32) -> bool {
        let (low, high) = self.range();
        ticks >= low && ticks <= high
    }

    /// Returns `true` if the whole `[low, high]` range lies inside this band.
    pub fn contains_range(&self, low: u32, high: u32) -> bool {
        let (band_low, band_high) = self.range();
        low >= band_low && high <= band_high
    }

    pub fn name(&self) -> &'static str {
        match self {
            Band::Am => "AM",
            Band::Fm => "FM",
            Band::Dab => "DAB",
        }
    }

    /// All bands, lowest first.
    pub fn all() -> &'static [Band] {
        ALL_BANDS
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error returned when a string cannot be parsed into a [`Band`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBandError(String);

impl fmt::Display for ParseBandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown band: '{}'", self.0)
    }
}

impl std::error::Error for ParseBandError {}

impl FromStr for Band {
    type Err = ParseBandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "am" => Ok(Band::Am),
            "fm" => Ok(Band::Fm),
            "dab" => Ok(Band::Dab),
            _ => Err(ParseBandError(s.to_string())),
        }
    }
}
