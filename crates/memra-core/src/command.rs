//! Packed 32-bit programming command word.
//!
//! Layout (LSB first): target ADC code (bits 0-11), tolerance code
//! (bits 12-23), attempt budget (bits 24-26), history-mode flag
//! (bit 27), element index (bits 28-31). Out-of-range field values are
//! rejected at construction instead of silently truncated.

use crate::fault::Fault;

const TARGET_MASK: u32 = 0x0000_0FFF;
const TOLERANCE_MASK: u32 = 0x0000_0FFF;
const TOLERANCE_SHIFT: u32 = 12;
const ATTEMPTS_MASK: u32 = 0x0000_0007;
const ATTEMPTS_SHIFT: u32 = 24;
const HISTORY_SHIFT: u32 = 27;
const ELEMENT_MASK: u32 = 0x0000_000F;
const ELEMENT_SHIFT: u32 = 28;

/// Maximum target/tolerance ADC code (12-bit fields).
pub const MAX_ADC_CODE: u16 = 0x0FFF;
/// Maximum programming attempt budget (3-bit field).
pub const MAX_ATTEMPTS: u8 = 0x07;
/// Maximum element index (4-bit field).
pub const MAX_ELEMENT: u8 = 0x0F;

/// Decoded programming command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandWord {
    /// Target resistance as an ADC code, `0..=4095`.
    pub target: u16,
    /// Allowed deviation from the target, as an ADC code delta.
    pub tolerance: u16,
    /// Maximum number of programming attempts, `0..=7`.
    pub attempts: u8,
    /// When set, every intermediate ramp value is persisted.
    pub history: bool,
    /// Index of the programmed element, `0..=15`.
    pub element: u8,
}

impl CommandWord {
    /// Builds a command word, validating every field against its width.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::FieldRange`] naming the first field whose value
    /// does not fit its bit width.
    pub const fn new(
        target: u16,
        tolerance: u16,
        attempts: u8,
        history: bool,
        element: u8,
    ) -> Result<Self, Fault> {
        if target > MAX_ADC_CODE {
            return Err(Fault::FieldRange {
                field: "target",
                value: target as u32,
                bits: 12,
            });
        }
        if tolerance > MAX_ADC_CODE {
            return Err(Fault::FieldRange {
                field: "tolerance",
                value: tolerance as u32,
                bits: 12,
            });
        }
        if attempts > MAX_ATTEMPTS {
            return Err(Fault::FieldRange {
                field: "attempts",
                value: attempts as u32,
                bits: 3,
            });
        }
        if element > MAX_ELEMENT {
            return Err(Fault::FieldRange {
                field: "element",
                value: element as u32,
                bits: 4,
            });
        }
        Ok(Self {
            target,
            tolerance,
            attempts,
            history,
            element,
        })
    }

    /// Packs the five fields into the 32-bit wire layout.
    #[must_use]
    pub const fn pack(self) -> u32 {
        (self.target as u32 & TARGET_MASK)
            | ((self.tolerance as u32 & TOLERANCE_MASK) << TOLERANCE_SHIFT)
            | ((self.attempts as u32 & ATTEMPTS_MASK) << ATTEMPTS_SHIFT)
            | ((self.history as u32) << HISTORY_SHIFT)
            | ((self.element as u32 & ELEMENT_MASK) << ELEMENT_SHIFT)
    }

    /// Unpacks a 32-bit word into its fields.
    ///
    /// Every field extracted through its mask is in range by
    /// construction, so this cannot fail.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn unpack(word: u32) -> Self {
        Self {
            target: (word & TARGET_MASK) as u16,
            tolerance: ((word >> TOLERANCE_SHIFT) & TOLERANCE_MASK) as u16,
            attempts: ((word >> ATTEMPTS_SHIFT) & ATTEMPTS_MASK) as u8,
            history: (word >> HISTORY_SHIFT) & 1 == 1,
            element: ((word >> ELEMENT_SHIFT) & ELEMENT_MASK) as u8,
        }
    }
}
