//! Fixed register address map for the simulated board memory window.

/// Base address of the provisioned 32-bit register window.
pub const WINDOW_BASE: u32 = 0xC000_0000;
/// Size of the provisioned window in address keys.
pub const WINDOW_BYTES: u32 = 0x8000;
/// Byte stride between consecutive words on the 32-bit bus.
pub const WORD_STRIDE: u32 = 4;

/// Device status register (`1` = ready, `0` = busy).
pub const STATUS_ADDR: u32 = WINDOW_BASE;
/// Result-identifier register.
pub const RESULT_ID_ADDR: u32 = WINDOW_BASE + 0x4;
/// Ingress command FIFO address (capacity-1 blocking slot).
pub const INGRESS_ADDR: u32 = WINDOW_BASE + 0x10;
/// First word of the self-test result block.
pub const SELFTEST_BASE: u32 = WINDOW_BASE + 0x40;
/// Number of words in the self-test result block.
pub const SELFTEST_SLOTS: u32 = 16;
/// Final ramp value written by program mode.
pub const PROGRAM_RESULT_ADDR: u32 = WINDOW_BASE + 0x80;
/// First word of the program-mode ramp history buffer.
pub const HISTORY_BASE: u32 = WINDOW_BASE + 0x4000;
/// Maximum number of ramp history entries.
pub const HISTORY_CAPACITY: u32 = 461;

/// Status register value meaning the device accepts commands.
pub const STATUS_READY: u32 = 1;
/// Status register value meaning the device is working.
pub const STATUS_BUSY: u32 = 0;

/// Result identifier: no result published yet.
pub const RESULT_NONE: u32 = 0;
/// Result identifier: self-test block is valid.
pub const RESULT_SELFTEST_DONE: u32 = 1;
/// Result identifier: program ramp result is valid.
pub const RESULT_PROGRAM_DONE: u32 = 2;

/// Device-mode selector for the matrix self-test.
pub const MODE_SELF_TEST: u32 = 0xA1;
/// Device-mode selector for element programming.
pub const MODE_PROGRAM: u32 = 0xB2;
/// Ingress sentinel that terminates the device simulation loop.
pub const SHUTDOWN_WORD: u32 = 777;

/// Full-scale ADC code for measurement and ramp values.
pub const ADC_FULL_SCALE: u32 = 4095;
/// Number of ramp steps spanning the full ADC scale.
pub const RAMP_STEPS: u32 = 461;

const _: () = assert!(
    HISTORY_BASE + HISTORY_CAPACITY * WORD_STRIDE - WINDOW_BASE <= WINDOW_BYTES,
    "history buffer must fit the provisioned window"
);
const _: () = assert!(
    SELFTEST_BASE + SELFTEST_SLOTS * WORD_STRIDE <= PROGRAM_RESULT_ADDR,
    "self-test block must not overlap the program result register"
);

/// Returns `true` when `addr` lies inside the provisioned window.
#[must_use]
pub const fn contains(addr: u32) -> bool {
    addr >= WINDOW_BASE && addr - WINDOW_BASE < WINDOW_BYTES
}

/// Decodes an absolute address into its window offset, if provisioned.
#[must_use]
pub const fn window_offset(addr: u32) -> Option<u32> {
    if contains(addr) {
        Some(addr - WINDOW_BASE)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::{
        contains, window_offset, HISTORY_BASE, HISTORY_CAPACITY, INGRESS_ADDR,
        PROGRAM_RESULT_ADDR, RESULT_ID_ADDR, SELFTEST_BASE, SELFTEST_SLOTS, STATUS_ADDR,
        WINDOW_BASE, WINDOW_BYTES, WORD_STRIDE,
    };

    #[test]
    fn window_bounds_are_inclusive_exclusive() {
        assert!(contains(WINDOW_BASE));
        assert!(contains(WINDOW_BASE + WINDOW_BYTES - 1));
        assert!(!contains(WINDOW_BASE - 1));
        assert!(!contains(WINDOW_BASE + WINDOW_BYTES));
        assert!(!contains(0));
    }

    #[test]
    fn known_registers_decode_to_expected_offsets() {
        assert_eq!(window_offset(STATUS_ADDR), Some(0x0000));
        assert_eq!(window_offset(RESULT_ID_ADDR), Some(0x0004));
        assert_eq!(window_offset(INGRESS_ADDR), Some(0x0010));
        assert_eq!(window_offset(SELFTEST_BASE), Some(0x0040));
        assert_eq!(window_offset(PROGRAM_RESULT_ADDR), Some(0x0080));
        assert_eq!(window_offset(HISTORY_BASE), Some(0x4000));
        assert_eq!(window_offset(WINDOW_BASE + WINDOW_BYTES), None);
    }

    #[test]
    fn result_blocks_fit_the_window() {
        let selftest_end = SELFTEST_BASE + (SELFTEST_SLOTS - 1) * WORD_STRIDE;
        assert!(contains(selftest_end));
        let history_end = HISTORY_BASE + (HISTORY_CAPACITY - 1) * WORD_STRIDE;
        assert!(contains(history_end));
    }
}
