//! Transport, hosting, and board operations for the register protocol.
//!
//! [`client::BoardClient`] speaks the wire protocol to a
//! [`server::RequestServer`], which owns the register space and the
//! device simulation thread. [`app`] builds the domain operations
//! (matrix self-test, element programming) out of primitive requests.

/// Transport client and connection state machine.
pub mod client;
pub use client::{BoardClient, CancelToken, ClientConfig, ClientError, LinkState};

/// Request server hosting the register space and device thread.
pub mod server;
pub use server::{RequestServer, ServerError};

/// Domain operations built from primitive requests.
pub mod app;
pub use app::{program_element, test_matrix, OpError, ProgramOutcome, ProgramRequest};

/// ADC code / resistance conversions.
pub mod conv;

/// Installs the process-wide log subscriber, honoring `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
