//! Wire protocol: request/response frames and their byte codec.
//!
//! A request frame is one explicit opcode byte followed by a bincode
//! body, so the opcode numbering (1-5 data, 252/254/255 control) is
//! stable on the wire regardless of enum layout. Responses carry no
//! opcode; their shape is implied by the request, so they travel as a
//! single bincode-encoded [`Response`]. Frames are sent whole and must
//! fit the fixed chunk ceiling.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fault::FaultCode;

/// Opcode: read one word.
pub const OP_READ_WORD: u8 = 1;
/// Opcode: write one word, echo it back.
pub const OP_WRITE_WORD: u8 = 2;
/// Opcode: read a strided block.
pub const OP_READ_BLOCK: u8 = 3;
/// Opcode: write a strided block, echo it back.
pub const OP_WRITE_BLOCK: u8 = 4;
/// Opcode: poll an address for a value with a timeout.
pub const OP_WAIT_FLAG: u8 = 5;
/// Control opcode: instantiate the remote memory controller.
pub const OP_CREATE_CONTROLLER: u8 = 252;
/// Control opcode: liveness check.
pub const OP_CHECK_ALIVE: u8 = 254;
/// Control opcode: stop the remote process.
pub const OP_STOP_SERVER: u8 = 255;

/// Fixed ceiling for one frame in either direction, in bytes.
pub const MAX_FRAME_BYTES: usize = 2048;

/// Upper bound on block word counts, derived from the reply ceiling.
pub const MAX_BLOCK_WORDS: u32 = 480;

/// Data-plane request dispatched by the memory controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Read one word at `addr`.
    ReadWord {
        /// Absolute register address.
        addr: u32,
    },
    /// Write one word at `addr` and echo the stored value.
    WriteWord {
        /// Absolute register address.
        addr: u32,
        /// Word to store.
        word: u32,
    },
    /// Read `count` words at `addr, addr+stride, ...`.
    ReadBlock {
        /// Absolute start address.
        addr: u32,
        /// Number of words to read.
        count: u32,
        /// Byte step between consecutive words.
        stride: u32,
    },
    /// Write `words` at strided addresses and echo the stored block.
    WriteBlock {
        /// Absolute start address.
        addr: u32,
        /// Words to store in order.
        words: Vec<u32>,
        /// Byte step between consecutive words.
        stride: u32,
    },
    /// Poll `addr` once per interval until it holds `value`.
    WaitFlag {
        /// Absolute register address.
        addr: u32,
        /// Value to wait for.
        value: u32,
        /// Poll budget in whole intervals.
        timeout_secs: u32,
    },
}

impl Request {
    /// Returns the stable wire opcode for this request.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::ReadWord { .. } => OP_READ_WORD,
            Self::WriteWord { .. } => OP_WRITE_WORD,
            Self::ReadBlock { .. } => OP_READ_BLOCK,
            Self::WriteBlock { .. } => OP_WRITE_BLOCK,
            Self::WaitFlag { .. } => OP_WAIT_FLAG,
        }
    }
}

/// Control-plane request handled by the hosting process itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlRequest {
    /// Instantiate the memory controller for the named driver.
    CreateController {
        /// Driver identifier, e.g. a shared-library name.
        driver: String,
    },
    /// Answer `Ack` if the process is alive.
    CheckAlive,
    /// Shut the hosting process down after acknowledging.
    StopServer,
}

impl ControlRequest {
    /// Returns the stable wire opcode for this control request.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        match self {
            Self::CreateController { .. } => OP_CREATE_CONTROLLER,
            Self::CheckAlive => OP_CHECK_ALIVE,
            Self::StopServer => OP_STOP_SERVER,
        }
    }
}

/// One request frame as it travels over the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Control-plane request.
    Control(ControlRequest),
    /// Data-plane request.
    Data(Request),
}

/// Reply to one request frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Word values, in request order.
    Words(Vec<u32>),
    /// Outcome of a wait-flag poll.
    Flag(bool),
    /// Control-plane acknowledgment.
    Ack,
    /// Error sentinel: the request failed server-side.
    Error(FaultCode),
}

/// Byte-codec failures for request and response frames.
#[derive(Debug, Error)]
pub enum WireError {
    /// Frame carried no opcode byte.
    #[error("empty frame")]
    EmptyFrame,
    /// Opcode byte is outside both dispatch tables.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),
    /// Body bytes did not decode as the opcode's operand layout.
    #[error("malformed frame body")]
    Body(#[from] bincode::Error),
}

/// Encodes a request frame: opcode byte, then the bincode body.
///
/// # Errors
///
/// Returns [`WireError::Body`] when the operand body fails to
/// serialize.
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::with_capacity(16);
    match frame {
        Frame::Data(request) => {
            buf.push(request.opcode());
            match request {
                Request::ReadWord { addr } => bincode::serialize_into(&mut buf, addr)?,
                Request::WriteWord { addr, word } => {
                    bincode::serialize_into(&mut buf, &(addr, word))?;
                }
                Request::ReadBlock {
                    addr,
                    count,
                    stride,
                } => bincode::serialize_into(&mut buf, &(addr, count, stride))?,
                Request::WriteBlock {
                    addr,
                    words,
                    stride,
                } => bincode::serialize_into(&mut buf, &(addr, words, stride))?,
                Request::WaitFlag {
                    addr,
                    value,
                    timeout_secs,
                } => bincode::serialize_into(&mut buf, &(addr, value, timeout_secs))?,
            }
        }
        Frame::Control(control) => {
            buf.push(control.opcode());
            if let ControlRequest::CreateController { driver } = control {
                bincode::serialize_into(&mut buf, driver)?;
            }
        }
    }
    Ok(buf)
}

/// Decodes a request frame received from the socket.
///
/// # Errors
///
/// Returns [`WireError::EmptyFrame`] for a zero-byte frame,
/// [`WireError::UnknownOpcode`] for an opcode outside both tables, and
/// [`WireError::Body`] when the body does not match the opcode's
/// operand layout.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, WireError> {
    let (&opcode, body) = bytes.split_first().ok_or(WireError::EmptyFrame)?;
    let frame = match opcode {
        OP_READ_WORD => {
            let addr = bincode::deserialize(body)?;
            Frame::Data(Request::ReadWord { addr })
        }
        OP_WRITE_WORD => {
            let (addr, word) = bincode::deserialize(body)?;
            Frame::Data(Request::WriteWord { addr, word })
        }
        OP_READ_BLOCK => {
            let (addr, count, stride) = bincode::deserialize(body)?;
            Frame::Data(Request::ReadBlock {
                addr,
                count,
                stride,
            })
        }
        OP_WRITE_BLOCK => {
            let (addr, words, stride) = bincode::deserialize(body)?;
            Frame::Data(Request::WriteBlock {
                addr,
                words,
                stride,
            })
        }
        OP_WAIT_FLAG => {
            let (addr, value, timeout_secs) = bincode::deserialize(body)?;
            Frame::Data(Request::WaitFlag {
                addr,
                value,
                timeout_secs,
            })
        }
        OP_CREATE_CONTROLLER => {
            let driver = bincode::deserialize(body)?;
            Frame::Control(ControlRequest::CreateController { driver })
        }
        OP_CHECK_ALIVE => Frame::Control(ControlRequest::CheckAlive),
        OP_STOP_SERVER => Frame::Control(ControlRequest::StopServer),
        other => return Err(WireError::UnknownOpcode(other)),
    };
    Ok(frame)
}

/// Encodes a response frame.
///
/// # Errors
///
/// Returns [`WireError::Body`] when serialization fails.
pub fn encode_response(response: &Response) -> Result<Vec<u8>, WireError> {
    Ok(bincode::serialize(response)?)
}

/// Decodes a response frame.
///
/// # Errors
///
/// Returns [`WireError::EmptyFrame`] for a zero-byte frame and
/// [`WireError::Body`] when the bytes do not decode as a [`Response`].
pub fn decode_response(bytes: &[u8]) -> Result<Response, WireError> {
    if bytes.is_empty() {
        return Err(WireError::EmptyFrame);
    }
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::{
        decode_frame, decode_response, encode_frame, encode_response, ControlRequest, Frame,
        Request, Response, WireError, MAX_FRAME_BYTES, OP_CREATE_CONTROLLER, OP_READ_WORD,
        OP_STOP_SERVER, OP_WAIT_FLAG, OP_WRITE_BLOCK,
    };
    use crate::fault::FaultCode;
    use crate::regmap::HISTORY_CAPACITY;

    #[test]
    fn request_frames_carry_stable_opcodes() {
        let read = encode_frame(&Frame::Data(Request::ReadWord { addr: 0xC000_0000 })).unwrap();
        assert_eq!(read[0], OP_READ_WORD);

        let wait = encode_frame(&Frame::Data(Request::WaitFlag {
            addr: 0xC000_0000,
            value: 1,
            timeout_secs: 10,
        }))
        .unwrap();
        assert_eq!(wait[0], OP_WAIT_FLAG);

        let block = encode_frame(&Frame::Data(Request::WriteBlock {
            addr: 0xC000_0010,
            words: vec![0xB2, 0x1234],
            stride: 0,
        }))
        .unwrap();
        assert_eq!(block[0], OP_WRITE_BLOCK);

        let create = encode_frame(&Frame::Control(ControlRequest::CreateController {
            driver: "mem_access.so".to_owned(),
        }))
        .unwrap();
        assert_eq!(create[0], OP_CREATE_CONTROLLER);

        let stop = encode_frame(&Frame::Control(ControlRequest::StopServer)).unwrap();
        assert_eq!(stop, vec![OP_STOP_SERVER]);
    }

    #[test]
    fn request_frames_roundtrip() {
        let frames = [
            Frame::Data(Request::ReadWord { addr: 0xC000_0080 }),
            Frame::Data(Request::WriteWord {
                addr: 0xC000_0010,
                word: 0xA1,
            }),
            Frame::Data(Request::ReadBlock {
                addr: 0xC000_0040,
                count: 16,
                stride: 4,
            }),
            Frame::Data(Request::WriteBlock {
                addr: 0xC000_0010,
                words: vec![0xB2, 0xFFFF_FFFF],
                stride: 0,
            }),
            Frame::Data(Request::WaitFlag {
                addr: 0xC000_0004,
                value: 2,
                timeout_secs: 20,
            }),
            Frame::Control(ControlRequest::CreateController {
                driver: "mem_access.so".to_owned(),
            }),
            Frame::Control(ControlRequest::CheckAlive),
            Frame::Control(ControlRequest::StopServer),
        ];
        for frame in frames {
            let bytes = encode_frame(&frame).unwrap();
            assert_eq!(decode_frame(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn unknown_and_empty_frames_are_rejected() {
        assert!(matches!(decode_frame(&[]), Err(WireError::EmptyFrame)));
        assert!(matches!(
            decode_frame(&[99]),
            Err(WireError::UnknownOpcode(99))
        ));
        assert!(matches!(decode_response(&[]), Err(WireError::EmptyFrame)));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let mut bytes =
            encode_frame(&Frame::Data(Request::WriteWord { addr: 1, word: 2 })).unwrap();
        bytes.truncate(3);
        assert!(matches!(decode_frame(&bytes), Err(WireError::Body(_))));
    }

    #[test]
    fn responses_roundtrip() {
        let responses = [
            Response::Words(vec![1, 2, 3]),
            Response::Flag(true),
            Response::Ack,
            Response::Error(FaultCode::UnknownOpcode),
        ];
        for response in responses {
            let bytes = encode_response(&response).unwrap();
            assert_eq!(decode_response(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn full_history_reply_fits_the_chunk_ceiling() {
        let words = vec![0xFFF_u32; HISTORY_CAPACITY as usize];
        let bytes = encode_response(&Response::Words(words)).unwrap();
        assert!(bytes.len() <= MAX_FRAME_BYTES);
    }
}
