//! Storage size measurement value
//!
//! `Size` is an exact byte count. Human-readable forms are only ever produced
//! for display; persisted sizes always carry the integer byte count so they
//! reconstruct without unit-conversion loss.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use num_format::{Locale, ToFormattedString};
use serde::{Deserialize, Serialize};

/// Units accepted when parsing sizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeUnit {
    Bytes,
    KiB,
    MiB,
    GiB,
    TiB,
    PiB,
    EiB,
    KB,
    MB,
    GB,
    TB,
    PB,
}

impl SizeUnit {
    /// Number of bytes in one unit
    pub const fn factor(self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::KiB => 1 << 10,
            SizeUnit::MiB => 1 << 20,
            SizeUnit::GiB => 1 << 30,
            SizeUnit::TiB => 1 << 40,
            SizeUnit::PiB => 1 << 50,
            SizeUnit::EiB => 1 << 60,
            SizeUnit::KB => 1_000,
            SizeUnit::MB => 1_000_000,
            SizeUnit::GB => 1_000_000_000,
            SizeUnit::TB => 1_000_000_000_000,
            SizeUnit::PB => 1_000_000_000_000_000,
        }
    }

    /// Parse a unit suffix (case-insensitive, "B" optional for binary units)
    pub fn parse(unit: &str) -> Option<Self> {
        let unit = match unit.to_ascii_lowercase().as_str() {
            "" | "b" | "byte" | "bytes" => SizeUnit::Bytes,
            "k" | "kib" => SizeUnit::KiB,
            "m" | "mib" => SizeUnit::MiB,
            "g" | "gib" => SizeUnit::GiB,
            "t" | "tib" => SizeUnit::TiB,
            "p" | "pib" => SizeUnit::PiB,
            "e" | "eib" => SizeUnit::EiB,
            "kb" => SizeUnit::KB,
            "mb" => SizeUnit::MB,
            "gb" => SizeUnit::GB,
            "tb" => SizeUnit::TB,
            "pb" => SizeUnit::PB,
            _ => return None,
        };
        Some(unit)
    }
}

/// An exact storage size in bytes.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(u64);

impl Size {
    pub const ZERO: Size = Size(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn kib(count: u64) -> Self {
        Self(count * SizeUnit::KiB.factor())
    }

    pub const fn mib(count: u64) -> Self {
        Self(count * SizeUnit::MiB.factor())
    }

    pub const fn gib(count: u64) -> Self {
        Self(count * SizeUnit::GiB.factor())
    }

    pub const fn tib(count: u64) -> Self {
        Self(count * SizeUnit::TiB.factor())
    }

    /// Byte count in the canonical unit
    pub const fn bytes(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Size) -> Option<Size> {
        self.0.checked_add(other.0).map(Size)
    }

    pub fn saturating_add(self, other: Size) -> Size {
        Size(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Size) -> Size {
        Size(self.0.saturating_sub(other.0))
    }

    /// Convert to a human-readable form (e.g., "1.50 GiB")
    pub fn human(self) -> String {
        let (val, unit) = scale(self.0);
        format!("{:.2} {}", val, unit)
    }

    /// Human-readable form followed by the exact byte count
    /// (e.g., "1.50 GiB (1,610,612,736 bytes)")
    pub fn human_with_bytes(self) -> String {
        format!(
            "{} ({} bytes)",
            self.human(),
            self.0.to_formatted_string(&Locale::en)
        )
    }
}

fn scale(bytes: u64) -> (f64, &'static str) {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    let mut steps = 0;
    let mut val = bytes as f64;

    while val >= 1024. && steps < UNITS.len() - 1 {
        val /= 1024.;
        steps += 1;
    }

    (val, UNITS[steps])
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human())
    }
}

impl From<u64> for Size {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl FromStr for Size {
    type Err = anyhow::Error;

    /// Parse "10 GiB", "10GiB", "1.5 TiB", "4096" or "512 B".
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(anyhow::anyhow!("Invalid input: empty size"));
        }

        let split_at = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split_at);
        let unit = unit.trim();

        let unit =
            SizeUnit::parse(unit).ok_or_else(|| anyhow::anyhow!("Invalid unit: {}", unit))?;

        // Whole numbers stay in integer arithmetic so large sizes parse exactly
        if let Ok(count) = number.parse::<u64>() {
            return count
                .checked_mul(unit.factor())
                .map(Size)
                .ok_or_else(|| anyhow::anyhow!("Size out of range: {}", s));
        }

        let val: f64 = number.parse()?;
        let bytes = val * unit.factor() as f64;
        if !bytes.is_finite() || bytes < 0. || bytes > u64::MAX as f64 {
            return Err(anyhow::anyhow!("Size out of range: {}", s));
        }

        Ok(Size(bytes.round() as u64))
    }
}
