//! Memory controller: primitive register operations and request dispatch.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::fault::Fault;
use crate::protocol::{Request, Response, MAX_BLOCK_WORDS};
use crate::space::RegisterSpace;

/// Tunable knobs for a controller instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Delay between consecutive `wait_flag` polls.
    ///
    /// One second on the board; tests shrink it without changing the
    /// one-poll-per-interval contract.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Executes primitive register operations against a shared space and
/// dispatches decoded protocol requests.
#[derive(Debug)]
pub struct MemoryController {
    space: Arc<RegisterSpace>,
    poll_interval: Duration,
}

impl MemoryController {
    /// Creates a controller with the default one-second poll interval.
    #[must_use]
    pub fn new(space: Arc<RegisterSpace>) -> Self {
        Self::with_config(space, ControllerConfig::default())
    }

    /// Creates a controller with explicit configuration.
    #[must_use]
    pub const fn with_config(space: Arc<RegisterSpace>, config: ControllerConfig) -> Self {
        Self {
            space,
            poll_interval: config.poll_interval,
        }
    }

    /// Reads one word; never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AddressOutOfRange`] for unprovisioned addresses.
    pub fn read_word(&self, addr: u32) -> Result<u32, Fault> {
        let word = self.space.load(addr)?;
        debug!("reading {word:#010x} from {addr:#010x}");
        Ok(word)
    }

    /// Writes one word; blocks only for an ingress enqueue.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AddressOutOfRange`] for unprovisioned addresses
    /// and [`Fault::ChannelClosed`] when the ingress consumer is gone.
    pub fn write_word(&self, addr: u32, word: u32) -> Result<(), Fault> {
        debug!("writing {word:#010x} to {addr:#010x}");
        self.space.store(addr, word)
    }

    /// Reads `count` words at `addr, addr+stride, ...`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::BlockTooLarge`] when the block would overflow a
    /// reply frame, [`Fault::AddressOutOfRange`] when a strided address
    /// overflows the 32-bit bus, or the first per-word fault
    /// encountered.
    pub fn read_block(&self, addr: u32, count: u32, stride: u32) -> Result<Vec<u32>, Fault> {
        if count > MAX_BLOCK_WORDS {
            return Err(Fault::BlockTooLarge { count });
        }
        let mut data = Vec::with_capacity(count as usize);
        for i in 0..count {
            data.push(self.read_word(strided_addr(addr, i, stride)?)?);
        }
        Ok(data)
    }

    /// Writes `words` at strided addresses, then re-reads and returns
    /// the same block as the acknowledgment echo.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::BlockTooLarge`] when the block would overflow a
    /// reply frame, [`Fault::AddressOutOfRange`] when a strided address
    /// overflows the 32-bit bus, or the first per-word fault
    /// encountered.
    pub fn write_block(&self, addr: u32, words: &[u32], stride: u32) -> Result<Vec<u32>, Fault> {
        let count = u32::try_from(words.len()).map_err(|_| Fault::BlockTooLarge {
            count: u32::MAX,
        })?;
        if count > MAX_BLOCK_WORDS {
            return Err(Fault::BlockTooLarge { count });
        }
        for (i, &word) in words.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            self.write_word(strided_addr(addr, i as u32, stride)?, word)?;
        }
        self.read_block(addr, count, stride)
    }

    /// Polls `addr` once per poll interval, up to `timeout_secs` polls.
    ///
    /// Returns `true` the first time the stored value equals `value`,
    /// `false` once the budget is exhausted. The poll is deliberately
    /// coarse and lossy: values held for less than one interval can be
    /// missed.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AddressOutOfRange`] for unprovisioned addresses.
    pub fn wait_flag(&self, addr: u32, value: u32, timeout_secs: u32) -> Result<bool, Fault> {
        debug!("waiting for {value:#010x} in {addr:#010x} for {timeout_secs} polls");
        for _ in 0..timeout_secs {
            if self.read_word(addr)? == value {
                return Ok(true);
            }
            thread::sleep(self.poll_interval);
        }
        Ok(false)
    }

    /// Services one decoded request.
    ///
    /// This is the dispatch boundary: every internal fault is converted
    /// into [`Response::Error`] so the peer always receives a reply.
    #[must_use]
    pub fn request(&self, request: &Request) -> Response {
        let outcome = match *request {
            Request::ReadWord { addr } => self.read_word(addr).map(|word| vec![word]),
            Request::WriteWord { addr, word } => self
                .write_word(addr, word)
                .and_then(|()| self.read_word(addr))
                .map(|echo| vec![echo]),
            Request::ReadBlock {
                addr,
                count,
                stride,
            } => self.read_block(addr, count, stride),
            Request::WriteBlock {
                addr,
                ref words,
                stride,
            } => self.write_block(addr, words, stride),
            Request::WaitFlag {
                addr,
                value,
                timeout_secs,
            } => {
                return match self.wait_flag(addr, value, timeout_secs) {
                    Ok(ready) => Response::Flag(ready),
                    Err(fault) => {
                        warn!("wait_flag failed: {fault}");
                        Response::Error(fault.code())
                    }
                };
            }
        };
        match outcome {
            Ok(words) => Response::Words(words),
            Err(fault) => {
                warn!("request failed: {fault}");
                Response::Error(fault.code())
            }
        }
    }
}

/// Computes `addr + index * stride`, faulting instead of wrapping when
/// wire-supplied operands overflow the 32-bit bus.
fn strided_addr(addr: u32, index: u32, stride: u32) -> Result<u32, Fault> {
    index
        .checked_mul(stride)
        .and_then(|offset| addr.checked_add(offset))
        .ok_or(Fault::AddressOutOfRange { addr })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use rstest::rstest;

    use super::{ControllerConfig, MemoryController};
    use crate::fault::{Fault, FaultCode};
    use crate::protocol::{Request, Response, MAX_BLOCK_WORDS};
    use crate::regmap::{INGRESS_ADDR, SELFTEST_BASE, STATUS_ADDR, WINDOW_BASE};
    use crate::space::RegisterSpace;

    fn fast_controller() -> MemoryController {
        MemoryController::with_config(
            Arc::new(RegisterSpace::new()),
            ControllerConfig {
                poll_interval: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn write_then_read_roundtrips() {
        let ctl = fast_controller();
        ctl.write_word(STATUS_ADDR, 0x1234).unwrap();
        assert_eq!(ctl.read_word(STATUS_ADDR).unwrap(), 0x1234);
    }

    #[test]
    fn block_write_echoes_the_written_region() {
        let ctl = fast_controller();
        let words = [10, 20, 30, 40];
        let echo = ctl.write_block(SELFTEST_BASE, &words, 4).unwrap();
        assert_eq!(echo, words);
        assert_eq!(ctl.read_block(SELFTEST_BASE, 4, 4).unwrap(), words);
    }

    #[test]
    fn oversized_blocks_are_refused() {
        let ctl = fast_controller();
        assert!(ctl.read_block(SELFTEST_BASE, MAX_BLOCK_WORDS + 1, 4).is_err());
        let words = vec![0_u32; MAX_BLOCK_WORDS as usize + 1];
        assert!(ctl.write_block(SELFTEST_BASE, &words, 4).is_err());
    }

    #[test]
    fn wait_flag_sees_value_written_by_another_thread() {
        let space = Arc::new(RegisterSpace::new());
        let ctl = MemoryController::with_config(
            Arc::clone(&space),
            ControllerConfig {
                poll_interval: Duration::from_millis(5),
            },
        );
        let writer = {
            let space = Arc::clone(&space);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(15));
                space.store(STATUS_ADDR, 0xAB).unwrap();
            })
        };
        assert!(ctl.wait_flag(STATUS_ADDR, 0xAB, 50).unwrap());
        writer.join().unwrap();
    }

    #[test]
    fn wait_flag_exhausts_the_poll_budget() {
        let ctl = fast_controller();
        let start = Instant::now();
        assert!(!ctl.wait_flag(STATUS_ADDR, 0xAB, 5).unwrap());
        // Five polls, one sleep each.
        assert!(start.elapsed() >= Duration::from_millis(5));
    }

    #[rstest]
    #[case::read_word(Request::ReadWord { addr: STATUS_ADDR })]
    #[case::write_word(Request::WriteWord { addr: STATUS_ADDR, word: 9 })]
    #[case::read_block(Request::ReadBlock { addr: SELFTEST_BASE, count: 2, stride: 4 })]
    #[case::write_block(Request::WriteBlock { addr: SELFTEST_BASE, words: vec![1, 2], stride: 4 })]
    fn dispatch_answers_words_for_data_requests(#[case] request: Request) {
        let ctl = fast_controller();
        assert!(matches!(ctl.request(&request), Response::Words(_)));
    }

    #[test]
    fn dispatch_write_word_echoes_the_stored_value() {
        let ctl = fast_controller();
        let response = ctl.request(&Request::WriteWord {
            addr: STATUS_ADDR,
            word: 0x55,
        });
        assert_eq!(response, Response::Words(vec![0x55]));
    }

    #[test]
    fn overflowing_strides_fault_instead_of_wrapping() {
        let ctl = fast_controller();
        let read = ctl.read_block(SELFTEST_BASE, 2, u32::MAX);
        assert_eq!(
            read,
            Err(Fault::AddressOutOfRange {
                addr: SELFTEST_BASE
            })
        );
        let write = ctl.write_block(u32::MAX, &[1, 2], 4);
        assert_eq!(
            write,
            Err(Fault::AddressOutOfRange { addr: u32::MAX })
        );
    }

    #[test]
    fn dispatch_answers_the_sentinel_for_overflowing_blocks() {
        let ctl = fast_controller();
        let response = ctl.request(&Request::ReadBlock {
            addr: SELFTEST_BASE,
            count: 2,
            stride: u32::MAX,
        });
        assert_eq!(response, Response::Error(FaultCode::AddressOutOfRange));
        let response = ctl.request(&Request::WriteBlock {
            addr: SELFTEST_BASE,
            words: vec![1, 2],
            stride: u32::MAX,
        });
        assert_eq!(response, Response::Error(FaultCode::AddressOutOfRange));
    }

    #[test]
    fn dispatch_converts_faults_into_the_error_sentinel() {
        let ctl = fast_controller();
        let response = ctl.request(&Request::ReadWord {
            addr: WINDOW_BASE - 4,
        });
        assert_eq!(response, Response::Error(FaultCode::AddressOutOfRange));
    }

    #[test]
    fn dispatch_wait_flag_answers_a_flag() {
        let ctl = fast_controller();
        ctl.write_word(STATUS_ADDR, 1).unwrap();
        let response = ctl.request(&Request::WaitFlag {
            addr: STATUS_ADDR,
            value: 1,
            timeout_secs: 1,
        });
        assert_eq!(response, Response::Flag(true));
    }

    #[test]
    fn ingress_write_word_echoes_the_driver_read() {
        let ctl = fast_controller();
        // The echo re-read of the ingress address yields 0 and must not
        // consume the queued command.
        let response = ctl.request(&Request::WriteWord {
            addr: INGRESS_ADDR,
            word: 0xA1,
        });
        assert_eq!(response, Response::Words(vec![0]));
    }
}
