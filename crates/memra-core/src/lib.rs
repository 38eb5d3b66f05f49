//! Register-protocol core for the memristor programming board.
//!
//! The board is driven through a 32-bit register window: a client sends
//! opcode-tagged request frames, a memory controller executes them
//! against the shared [`RegisterSpace`], and a simulated device thread
//! consumes commands from the single-slot ingress FIFO and publishes
//! results back into the window.

/// Fixed register address map and mode/result constants.
pub mod regmap;

/// Fault taxonomy for register access and request dispatch.
pub mod fault;
pub use fault::{Fault, FaultCode};

/// Shared register space with the single-slot ingress FIFO.
pub mod space;
pub use space::RegisterSpace;

/// Packed 32-bit programming command word.
pub mod command;
pub use command::{CommandWord, MAX_ADC_CODE, MAX_ATTEMPTS, MAX_ELEMENT};

/// Wire protocol frames and byte codec.
pub mod protocol;
pub use protocol::{
    decode_frame, decode_response, encode_frame, encode_response, ControlRequest, Frame, Request,
    Response, WireError, MAX_BLOCK_WORDS, MAX_FRAME_BYTES,
};

/// Memory controller primitives and dispatch.
pub mod controller;
pub use controller::{ControllerConfig, MemoryController};

/// Simulated board-side device logic.
pub mod device;
pub use device::DeviceSim;
