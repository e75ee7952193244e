//! Lithology composition: the composite per-cell attribute.
//!
//! A [`Lithology`] is the rich, in-memory value a provider builds for a grid
//! cell. It cannot be persisted directly; at write time it is frozen into an
//! 8-slot [`LithologyRecord`]:
//!
//! ```text
//! [major, minor1, minor2, minor3, others1, others2, others3, colors]
//! ```
//!
//! Absent slots are `None`. `colors` holds the running-mean colour as
//! `#rrggbb`. At most three minors and three others are kept; longer lists
//! are truncated to the first three in encounter order.

mod text;

use std::fmt;

use thiserror::Error;

pub use text::{parse_free_text, LithologyUpdate, TextPattern, MAJOR_SHARE_THRESHOLD};

/// Name of the composite variable in object mode.
pub const LITHOLOGY_VARIABLE: &str = "lithology";

/// Names of the flat sibling variables, in record order.
pub const LITHOLOGY_SLOTS: [&str; 8] = [
    "major", "minor1", "minor2", "minor3", "others1", "others2", "others3", "colors",
];

/// Maximum number of minors retained in a record.
pub const MAX_MINORS: usize = 3;

/// Maximum number of unordered lithologies retained in a record.
pub const MAX_OTHERS: usize = 3;

const MAJOR_SLOT: usize = 0;
const MINOR_SLOTS: std::ops::Range<usize> = 1..4;
const OTHER_SLOTS: std::ops::Range<usize> = 4..7;
const COLOR_SLOT: usize = 7;

/// Flat, persistable form of a [`Lithology`].
pub type LithologyRecord = [Option<String>; 8];

/// An RGB colour.
pub type Rgb = [u8; 3];

/// A record slot that could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("slot '{slot}': {reason}")]
pub struct SlotError {
    pub slot: &'static str,
    pub reason: String,
}

/// Running mean over colour observations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColorMean {
    sum: [u64; 3],
    count: u64,
}

impl ColorMean {
    /// Add one colour observation.
    pub fn push(&mut self, rgb: Rgb) {
        for (acc, channel) in self.sum.iter_mut().zip(rgb) {
            *acc += u64::from(channel);
        }
        self.count += 1;
    }

    /// Number of observations so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Mean colour, truncated per channel. Black when nothing was observed.
    pub fn mean(&self) -> Rgb {
        if self.count == 0 {
            return [0, 0, 0];
        }
        let channel = |i: usize| (self.sum[i] / self.count) as u8;
        [channel(0), channel(1), channel(2)]
    }
}

/// Lithology composition of one grid cell.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Lithology {
    major: Option<String>,
    minors: Vec<String>,
    others: Vec<String>,
    colors: ColorMean,
}

impl Lithology {
    /// Create an empty composition.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a composition from one free-text description.
    pub fn from_description(description: &str) -> Self {
        let mut lithology = Self::new();
        lithology.apply(parse_free_text(description));
        lithology
    }

    pub fn major(&self) -> Option<&str> {
        self.major.as_deref()
    }

    pub fn set_major(&mut self, major: Option<String>) {
        self.major = major;
    }

    pub fn minors(&self) -> &[String] {
        &self.minors
    }

    /// Replace the minor lithologies.
    pub fn set_minors<I, S>(&mut self, minors: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.minors = minors.into_iter().map(Into::into).collect();
    }

    /// Unordered lithologies, deduplicated, in first-seen order.
    pub fn others(&self) -> &[String] {
        &self.others
    }

    /// Accumulate unordered lithologies, skipping ones already present.
    pub fn add_others<I, S>(&mut self, others: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for other in others {
            let other = other.into();
            if !self.others.contains(&other) {
                self.others.push(other);
            }
        }
    }

    /// Add one colour observation to the running mean.
    pub fn add_color(&mut self, rgb: Rgb) {
        self.colors.push(rgb);
    }

    /// Mean of all colour observations.
    pub fn color(&self) -> Rgb {
        self.colors.mean()
    }

    /// Number of colour observations.
    pub fn color_samples(&self) -> u64 {
        self.colors.count()
    }

    /// True if no composition field has been set.
    pub fn is_empty(&self) -> bool {
        self.major.is_none() && self.minors.is_empty() && self.others.is_empty()
    }

    /// Merge a parsed free-text update into this composition.
    ///
    /// Tagged and percentage updates replace `major` and `minors`; token
    /// updates accumulate into `others`.
    pub fn apply(&mut self, update: LithologyUpdate) {
        match update.pattern {
            TextPattern::Tagged | TextPattern::Percentages => {
                self.major = update.major;
                self.minors = update.minors;
            }
            TextPattern::Tokens => {}
        }
        self.add_others(update.others);
    }

    /// Interpret several source descriptions for the same cell.
    ///
    /// Returns the index of the row carrying the most specific information:
    /// the last tagged or percentage row if there is one, otherwise the first
    /// row at all. Providers sample the colour of that row.
    pub fn interpret_rows<S: AsRef<str>>(&mut self, rows: &[S]) -> Option<usize> {
        let mut best = None;
        for (index, row) in rows.iter().enumerate() {
            let update = parse_free_text(row.as_ref());
            if update.is_specific() || best.is_none() {
                best = Some(index);
            }
            self.apply(update);
        }
        best
    }

    /// Freeze into the flat record.
    pub fn encode(&self) -> LithologyRecord {
        let mut record: LithologyRecord = Default::default();
        record[MAJOR_SLOT] = self.major.clone();
        for (slot, minor) in MINOR_SLOTS.zip(self.minors.iter().take(MAX_MINORS)) {
            record[slot] = Some(minor.clone());
        }
        for (slot, other) in OTHER_SLOTS.zip(self.others.iter().take(MAX_OTHERS)) {
            record[slot] = Some(other.clone());
        }
        if !self.colors.is_empty() {
            record[COLOR_SLOT] = Some(rgb_to_hex(self.colors.mean()));
        }
        record
    }

    /// Rebuild from the flat record.
    ///
    /// The colour comes back as a single, already-averaged observation.
    pub fn decode(record: &LithologyRecord) -> Result<Self, SlotError> {
        let mut lithology = Self {
            major: record[MAJOR_SLOT].clone(),
            minors: record[MINOR_SLOTS].iter().flatten().cloned().collect(),
            others: Vec::new(),
            colors: ColorMean::default(),
        };
        lithology.add_others(record[OTHER_SLOTS].iter().flatten().cloned());

        if let Some(hex) = &record[COLOR_SLOT] {
            let rgb = hex_to_rgb(hex).map_err(|reason| SlotError {
                slot: LITHOLOGY_SLOTS[COLOR_SLOT],
                reason,
            })?;
            lithology.add_color(rgb);
        }

        Ok(lithology)
    }
}

impl fmt::Display for Lithology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "major={} minors=[{}] others=[{}] color={}",
            self.major.as_deref().unwrap_or("-"),
            self.minors.join(", "),
            self.others.join(", "),
            rgb_to_hex(self.color())
        )
    }
}

/// Format a colour as `#rrggbb`.
pub fn rgb_to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

/// Parse `#rrggbb` (case-insensitive).
pub fn hex_to_rgb(hex: &str) -> Result<Rgb, String> {
    let digits = hex
        .strip_prefix('#')
        .ok_or_else(|| format!("'{}' does not start with '#'", hex))?;
    if digits.len() != 6 || !digits.is_ascii() {
        return Err(format!("'{}' is not a 6-digit hex colour", hex));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&digits[i..i + 2], 16)
            .map_err(|e| format!("'{}' has an invalid channel: {}", hex, e))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}
