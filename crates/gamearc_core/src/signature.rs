//! Heuristic format identification.
//!
//! Every decoder rates an unknown stream by ticking off independent checks on a [`ScoreCard`].
//! A matching magic is worth [`MAGIC_WEIGHT`], a matching file extension [`EXTENSION_WEIGHT`],
//! and every structural check that passes (a count that fits in the file, an offset that lands
//! inside it, ...) adds [`PLAUSIBLE_WEIGHT`]. The sum is clamped to `0..=100`.
//!
//! Rating is done through [`score`], which restores the cursor position afterwards and turns any
//! read failure into a zero score, so identification never fails and never moves the cursor.

use std::fmt;

use tracing::trace;

use crate::{cursor::ByteCursor, entry::SourceLocation, error::Result};

/// Weight of a magic number or header match
pub const MAGIC_WEIGHT: u8 = 50;

/// Weight of a file extension match
pub const EXTENSION_WEIGHT: u8 = 25;

/// Weight of a single structural plausibility check
pub const PLAUSIBLE_WEIGHT: u8 = 5;

/// Default score a decoder must reach before it is tried
pub const MATCH_THRESHOLD: u8 = 50;

/// How sure a decoder is that a stream is in its format, from 0 to 100
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Confidence(u8);

impl Confidence {
    pub const ZERO: Confidence = Confidence(0);
    pub const CERTAIN: Confidence = Confidence(100);

    /// Build a confidence, clamping to 100
    pub fn new(value: u8) -> Confidence {
        Confidence(value.min(100))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Whether this confidence reaches `threshold`
    pub fn reaches(self, threshold: u8) -> bool {
        self.0 >= threshold
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Accumulates weighted identification checks
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScoreCard {
    total: u16,
}

impl ScoreCard {
    pub fn new() -> ScoreCard {
        ScoreCard::default()
    }

    /// Add `weight` when `passed` holds. Returns `passed` so checks can gate later ones.
    pub fn check(&mut self, passed: bool, weight: u8) -> bool {
        if passed {
            self.total = self.total.saturating_add(weight as u16);
        }
        passed
    }

    /// Magic number or header comparison
    pub fn magic(&mut self, found: &[u8], expected: &[u8]) -> bool {
        self.check(found == expected, MAGIC_WEIGHT)
    }

    /// File extension comparison, case-insensitive
    pub fn extension(&mut self, source: &SourceLocation, extensions: &[&str]) -> bool {
        let matched = source
            .extension()
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)));
        self.check(matched, EXTENSION_WEIGHT)
    }

    /// A structural plausibility check
    pub fn plausible(&mut self, passed: bool) -> bool {
        self.check(passed, PLAUSIBLE_WEIGHT)
    }

    /// The clamped result
    pub fn confidence(&self) -> Confidence {
        Confidence::new(self.total.min(100) as u8)
    }
}

/// Run a rating function as a pure, total score.
///
/// The cursor is restored to its starting position and any error raised by `rate` yields
/// [`Confidence::ZERO`].
pub fn score(
    cursor: &mut ByteCursor,
    rate: impl FnOnce(&mut ByteCursor, &mut ScoreCard) -> Result<()>,
) -> Confidence {
    let mut card = ScoreCard::new();
    match cursor.restoring(|c| rate(c, &mut card)) {
        Ok(()) => card.confidence(),
        Err(e) => {
            trace!(error = %e, "rating failed");
            Confidence::ZERO
        }
    }
}

/// Read the leading `width` bytes of the stream for magic comparison.
///
/// Short streams produce a shorter slice, which simply fails to match.
pub fn leading_bytes(cursor: &mut ByteCursor, width: usize) -> Result<Vec<u8>> {
    cursor.seek(0)?;
    let available = cursor.len().min(width as u64);
    cursor.read_bytes(available)
}
