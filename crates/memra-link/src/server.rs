//! Request server hosting the register space, controller, and device.
//!
//! This is the privileged memory-access side of the deployment: it
//! owns the [`RegisterSpace`], runs the device simulation thread,
//! and answers one reply per request frame. Only one client is served
//! at a time; a dropped client returns the server to the accept loop.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use memra_core::protocol::{
    decode_frame, encode_response, ControlRequest, Frame, Response, WireError, MAX_FRAME_BYTES,
};
use memra_core::regmap::{INGRESS_ADDR, SHUTDOWN_WORD};
use memra_core::{ControllerConfig, DeviceSim, FaultCode, MemoryController, RegisterSpace};

/// Server-side failures that abort the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Listener or device-thread spawn failure.
    #[error("socket failure")]
    Io(#[from] io::Error),
    /// Reply serialization failure.
    #[error("wire codec failure")]
    Wire(#[from] WireError),
    /// The device simulation thread panicked.
    #[error("device simulation thread panicked")]
    DevicePanicked,
}

/// One hosting process for a single board instance.
#[derive(Debug)]
pub struct RequestServer {
    listener: TcpListener,
    space: Arc<RegisterSpace>,
    controller_config: ControllerConfig,
}

impl RequestServer {
    /// Binds the listener and provisions a fresh register space.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the address cannot be bound.
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr)?,
            space: Arc::new(RegisterSpace::new()),
            controller_config: ControllerConfig::default(),
        })
    }

    /// Overrides the controller configuration used for instantiation.
    #[must_use]
    pub const fn with_controller_config(mut self, config: ControllerConfig) -> Self {
        self.controller_config = config;
        self
    }

    /// Returns the bound listener address (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns the OS error when the local address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until a stop request arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when the device thread cannot be spawned
    /// or panicked, or when a reply fails to serialize.
    pub fn run(self) -> Result<(), ServerError> {
        let device = DeviceSim::new(Arc::clone(&self.space)).spawn()?;
        let mut controller: Option<MemoryController> = None;

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!("accept failed: {err}");
                    continue;
                }
            };
            info!("client connected from {peer}");
            if !self.serve_client(stream, &mut controller)? {
                break;
            }
        }

        // Ask the device loop to terminate, then wait for it.
        if let Err(fault) = self.space.store(INGRESS_ADDR, SHUTDOWN_WORD) {
            warn!("could not post the shutdown sentinel: {fault}");
        }
        device.join().map_err(|_| ServerError::DevicePanicked)?;
        info!("server stopped");
        Ok(())
    }

    /// Serves one client until it disconnects or requests a stop.
    ///
    /// Each request frame is taken from a single read: frames fit the
    /// chunk ceiling and travel whole, so a short read would desync
    /// the stream.
    ///
    /// Returns `false` when the stop request was acknowledged and the
    /// accept loop should end.
    fn serve_client(
        &self,
        mut stream: TcpStream,
        controller: &mut Option<MemoryController>,
    ) -> Result<bool, ServerError> {
        let mut buf = [0_u8; MAX_FRAME_BYTES];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => {
                    info!("client disconnected");
                    return Ok(true);
                }
                Ok(n) => n,
                Err(err) => {
                    warn!("receive failed: {err}");
                    return Ok(true);
                }
            };

            let mut stop = false;
            let response = match decode_frame(&buf[..n]) {
                Ok(Frame::Control(control)) => {
                    stop = matches!(control, ControlRequest::StopServer);
                    self.control(control, controller)
                }
                Ok(Frame::Data(request)) => {
                    debug!("servicing opcode {}", request.opcode());
                    controller.as_ref().map_or(
                        Response::Error(FaultCode::NoController),
                        |ctl| ctl.request(&request),
                    )
                }
                Err(WireError::UnknownOpcode(opcode)) => {
                    warn!("there is no such request: opcode {opcode}");
                    Response::Error(FaultCode::UnknownOpcode)
                }
                Err(err) => {
                    warn!("malformed frame: {err}");
                    Response::Error(FaultCode::MalformedRequest)
                }
            };

            let bytes = encode_response(&response)?;
            if let Err(err) = stream.write_all(&bytes) {
                warn!("reply transmit failed: {err}");
                return Ok(true);
            }
            if stop {
                info!("stop requested, leaving the accept loop");
                return Ok(false);
            }
        }
    }

    fn control(
        &self,
        control: ControlRequest,
        controller: &mut Option<MemoryController>,
    ) -> Response {
        match control {
            ControlRequest::CreateController { driver } => {
                info!("instantiating the memory controller for driver {driver}");
                *controller = Some(MemoryController::with_config(
                    Arc::clone(&self.space),
                    self.controller_config,
                ));
                Response::Ack
            }
            ControlRequest::CheckAlive => Response::Ack,
            ControlRequest::StopServer => Response::Ack,
        }
    }
}
