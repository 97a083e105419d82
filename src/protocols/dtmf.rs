//! DTMF (Dual-Tone Multi-Frequency) digit alphabet

use crate::{Error, Result};

/// The sixteen symbols a DTMF keypad can produce, minus the A-D column
/// which most deployments only enable on request.
const STANDARD_DIGITS: &str = "0123456789*#";

/// Set of symbols accepted by a pattern registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigitAlphabet {
    extra: Vec<char>,
}

impl DigitAlphabet {
    /// Standard keypad: `0`-`9`, `*` and `#`.
    pub fn standard() -> Self {
        Self { extra: Vec::new() }
    }

    /// Standard keypad plus extra symbols (for example the `ABCD` column).
    pub fn with_extra(extra: &str) -> Result<Self> {
        let mut symbols = Vec::new();
        for c in extra.chars() {
            if c.is_whitespace() || c.is_control() {
                return Err(Error::parse(format!("Invalid DTMF symbol {:?}", c)));
            }
            if !STANDARD_DIGITS.contains(c) && !symbols.contains(&c) {
                symbols.push(c);
            }
        }
        Ok(Self { extra: symbols })
    }

    pub fn contains(&self, digit: char) -> bool {
        STANDARD_DIGITS.contains(digit) || self.extra.contains(&digit)
    }

    /// Checks every symbol of `sequence`, returning the first offender.
    pub fn validate(&self, sequence: &str) -> Result<()> {
        match sequence.chars().find(|&c| !self.contains(c)) {
            Some(c) => Err(Error::invalid_pattern(format!(
                "symbol {:?} in {:?} is not a DTMF digit",
                c, sequence
            ))),
            None => Ok(()),
        }
    }

    pub fn extra(&self) -> &[char] {
        &self.extra
    }
}

impl Default for DigitAlphabet {
    fn default() -> Self {
        Self::standard()
    }
}
