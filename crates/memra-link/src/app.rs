//! Domain operations built from primitive register requests.
//!
//! Both operations follow the same discipline: wait for the device to
//! be ready, post a command through the ingress FIFO, wait for the
//! result identifier, then read the published data. Any shape or flag
//! mismatch degrades to a zero-filled data set instead of failing the
//! whole operation, so a partial failure still yields a plottable
//! result.

use thiserror::Error;
use tracing::{info, warn};

use memra_core::regmap::{
    HISTORY_BASE, HISTORY_CAPACITY, INGRESS_ADDR, MODE_PROGRAM, MODE_SELF_TEST,
    PROGRAM_RESULT_ADDR, RESULT_ID_ADDR, RESULT_PROGRAM_DONE, RESULT_SELFTEST_DONE, SELFTEST_BASE,
    SELFTEST_SLOTS, STATUS_ADDR, STATUS_READY, WORD_STRIDE,
};
use memra_core::{CommandWord, Fault, Request, Response};

use crate::client::{BoardClient, ClientError};
use crate::conv;

/// Number of elements in the memristor matrix.
pub const ELEMENT_COUNT: usize = 16;

/// Poll budget while waiting for device readiness, in poll intervals.
const WAIT_READY_POLLS: u32 = 10;
/// Poll budget while waiting for a programming result.
const WAIT_PROGRAM_POLLS: u32 = 20;

/// Failures inside a domain operation; callers degrade on them.
#[derive(Debug, Error)]
pub enum OpError {
    /// Transport-level failure.
    #[error("transport failure")]
    Client(#[from] ClientError),
    /// Command-word field validation failure.
    #[error("command word rejected")]
    Command(#[from] Fault),
    /// A wait-flag poll ran out of budget.
    #[error("device did not reach the expected state in time")]
    NotReady,
    /// Reply shape did not match the request.
    #[error("reply shape mismatch: expected {expected} words, got {got}")]
    BadShape {
        /// Expected word count.
        expected: usize,
        /// Received word count.
        got: usize,
    },
}

/// Parameters for programming one matrix element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgramRequest {
    /// Target resistance, in kOhm.
    pub target_kohm: f64,
    /// Allowed deviation above the target, in percent.
    pub tolerance_pct: f64,
    /// Maximum number of programming attempts, `0..=7`.
    pub attempts: u8,
    /// Persist every intermediate ramp value.
    pub save_history: bool,
    /// Element index, `0..=15`.
    pub element: u8,
}

/// Result of programming one matrix element.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramOutcome {
    /// Final ramp value converted to kOhm.
    pub final_kohm: f64,
    /// Ramp history in kOhm; empty unless history was requested.
    pub history_kohm: Vec<f64>,
}

/// Runs the matrix self-test and returns one resistance per element.
///
/// Degrades to sixteen zeros when anything goes wrong.
#[must_use]
pub fn test_matrix(client: &mut BoardClient) -> Vec<f64> {
    info!("trying to test the matrix");
    match try_test_matrix(client) {
        Ok(values) => values,
        Err(err) => {
            warn!("matrix test degraded to zeros: {err}");
            vec![0.0; ELEMENT_COUNT]
        }
    }
}

fn try_test_matrix(client: &mut BoardClient) -> Result<Vec<f64>, OpError> {
    expect_flag(client.send(Request::WaitFlag {
        addr: STATUS_ADDR,
        value: STATUS_READY,
        timeout_secs: WAIT_READY_POLLS,
    })?)?;

    let _echo = client.send(Request::WriteWord {
        addr: INGRESS_ADDR,
        word: MODE_SELF_TEST,
    })?;

    expect_flag(client.send(Request::WaitFlag {
        addr: RESULT_ID_ADDR,
        value: RESULT_SELFTEST_DONE,
        timeout_secs: WAIT_READY_POLLS,
    })?)?;

    let words = expect_words(
        client.send(Request::ReadBlock {
            addr: SELFTEST_BASE,
            count: SELFTEST_SLOTS,
            stride: WORD_STRIDE,
        })?,
        ELEMENT_COUNT,
    )?;

    let values = words
        .iter()
        .enumerate()
        .map(|(i, &code)| convert_for_element(i, code))
        .collect::<Vec<_>>();
    for (i, value) in values.iter().enumerate() {
        info!("memristor no. {}: {:.2} kOhm", i + 1, value);
    }
    Ok(values)
}

/// Programs one element to a target resistance.
///
/// Degrades to a zeroed outcome when anything goes wrong; a failed
/// history read degrades only the history, keeping the final value.
#[must_use]
pub fn program_element(client: &mut BoardClient, request: &ProgramRequest) -> ProgramOutcome {
    info!(
        "trying to program element {} to {:.2} kOhm",
        request.element, request.target_kohm
    );
    match try_program_element(client, request) {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("programming degraded to zeros: {err}");
            ProgramOutcome {
                final_kohm: 0.0,
                history_kohm: if request.save_history {
                    vec![0.0; HISTORY_CAPACITY as usize]
                } else {
                    Vec::new()
                },
            }
        }
    }
}

fn try_program_element(
    client: &mut BoardClient,
    request: &ProgramRequest,
) -> Result<ProgramOutcome, OpError> {
    let cmd = build_command_word(request)?;

    expect_flag(client.send(Request::WaitFlag {
        addr: STATUS_ADDR,
        value: STATUS_READY,
        timeout_secs: WAIT_READY_POLLS,
    })?)?;

    // Two-phase handshake: the mode selector and the command word go
    // through the ingress FIFO as a stride-0 block write.
    let _echo = client.send(Request::WriteBlock {
        addr: INGRESS_ADDR,
        words: vec![MODE_PROGRAM, cmd.pack()],
        stride: 0,
    })?;

    expect_flag(client.send(Request::WaitFlag {
        addr: RESULT_ID_ADDR,
        value: RESULT_PROGRAM_DONE,
        timeout_secs: WAIT_PROGRAM_POLLS,
    })?)?;

    let final_code = expect_words(
        client.send(Request::ReadWord {
            addr: PROGRAM_RESULT_ADDR,
        })?,
        1,
    )?[0];
    let final_kohm = convert_for_element(usize::from(request.element), final_code);

    let history_kohm = if request.save_history {
        read_history(client, request.element)
    } else {
        Vec::new()
    };

    Ok(ProgramOutcome {
        final_kohm,
        history_kohm,
    })
}

/// Reads the full ramp history; degrades to zeros on its own so a bad
/// history read does not discard the final programming result.
fn read_history(client: &mut BoardClient, element: u8) -> Vec<f64> {
    let outcome = client
        .send(Request::ReadBlock {
            addr: HISTORY_BASE,
            count: HISTORY_CAPACITY,
            stride: WORD_STRIDE,
        })
        .map_err(OpError::from)
        .and_then(|response| expect_words(response, HISTORY_CAPACITY as usize));
    match outcome {
        Ok(words) => words
            .iter()
            .map(|&code| convert_for_element(usize::from(element), code))
            .collect(),
        Err(err) => {
            warn!("history read degraded to zeros: {err}");
            vec![0.0; HISTORY_CAPACITY as usize]
        }
    }
}

/// Builds the packed command word from operator-facing units.
///
/// The tolerance field is the ADC-code distance between the target and
/// the upper tolerance bound.
fn build_command_word(request: &ProgramRequest) -> Result<CommandWord, OpError> {
    let target = conv::kohm_to_adc(request.target_kohm);
    let upper = conv::kohm_to_adc(request.target_kohm * (1.0 + request.tolerance_pct / 100.0));
    let tolerance = upper.saturating_sub(target);
    Ok(CommandWord::new(
        target,
        tolerance,
        request.attempts,
        request.save_history,
        request.element,
    )?)
}

#[allow(clippy::cast_possible_truncation)]
fn convert_for_element(element: usize, code: u32) -> f64 {
    if conv::uses_corrected_channel(element as u8) {
        conv::adc_to_kohm_corrected(code)
    } else {
        conv::adc_to_kohm(code)
    }
}

fn expect_flag(response: Response) -> Result<(), OpError> {
    match response {
        Response::Flag(true) => Ok(()),
        Response::Flag(false) => Err(OpError::NotReady),
        Response::Words(words) => Err(OpError::BadShape {
            expected: 1,
            got: words.len(),
        }),
        Response::Ack | Response::Error(_) => Err(OpError::BadShape {
            expected: 1,
            got: 0,
        }),
    }
}

fn expect_words(response: Response, expected: usize) -> Result<Vec<u32>, OpError> {
    match response {
        Response::Words(words) if words.len() == expected => Ok(words),
        Response::Words(words) => Err(OpError::BadShape {
            expected,
            got: words.len(),
        }),
        Response::Flag(_) | Response::Ack | Response::Error(_) => Err(OpError::BadShape {
            expected,
            got: 0,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{build_command_word, expect_flag, expect_words, OpError, ProgramRequest};
    use memra_core::{FaultCode, Response};

    fn request(target_kohm: f64, tolerance_pct: f64) -> ProgramRequest {
        ProgramRequest {
            target_kohm,
            tolerance_pct,
            attempts: 1,
            save_history: true,
            element: 3,
        }
    }

    #[test]
    fn command_word_encodes_target_and_tolerance_codes() {
        let cmd = build_command_word(&request(5.0, 10.0)).unwrap();
        // 5 kOhm of a 10 kOhm scale is mid-range.
        assert_eq!(cmd.target, 2048);
        // 10 % above 5 kOhm adds about 205 codes.
        assert!(cmd.tolerance > 0);
        assert_eq!(
            u32::from(cmd.tolerance),
            u32::from(crate::conv::kohm_to_adc(5.5)) - 2048
        );
        assert!(cmd.history);
        assert_eq!(cmd.element, 3);
    }

    #[test]
    fn zero_tolerance_yields_a_zero_code() {
        let cmd = build_command_word(&request(2.0, 0.0)).unwrap();
        assert_eq!(cmd.tolerance, 0);
    }

    #[test]
    fn out_of_range_element_is_rejected() {
        let mut bad = request(5.0, 0.0);
        bad.element = 16;
        assert!(matches!(
            build_command_word(&bad),
            Err(OpError::Command(_))
        ));
    }

    #[test]
    fn flag_and_shape_checks_reject_mismatches() {
        assert!(expect_flag(Response::Flag(true)).is_ok());
        assert!(matches!(
            expect_flag(Response::Flag(false)),
            Err(OpError::NotReady)
        ));
        assert!(matches!(
            expect_flag(Response::Error(FaultCode::Internal)),
            Err(OpError::BadShape { .. })
        ));

        assert_eq!(
            expect_words(Response::Words(vec![1, 2]), 2).unwrap(),
            vec![1, 2]
        );
        assert!(matches!(
            expect_words(Response::Words(vec![1, 2]), 16),
            Err(OpError::BadShape {
                expected: 16,
                got: 2
            })
        ));
        assert!(matches!(
            expect_words(Response::Flag(true), 1),
            Err(OpError::BadShape { .. })
        ));
    }
}
