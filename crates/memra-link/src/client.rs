//! Transport client for the board's request server.
//!
//! The client owns one stream socket, a connection state machine
//! (`Disconnected -> Connecting -> Connected`), and a retry thread that
//! keeps attempting the connection with a cooperative cancellation
//! token. One request is outstanding at a time; `send` blocks for the
//! single reply read.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use memra_core::protocol::{
    decode_response, encode_frame, ControlRequest, Frame, Request, Response, WireError,
    MAX_FRAME_BYTES,
};

/// Default server port.
pub const DEFAULT_PORT: u16 = 49094;
/// Default connection attempt budget.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
/// Default pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);
/// Default driver identifier sent with the bootstrap request.
pub const DEFAULT_DRIVER: &str = "mem_access.so";

/// Connection settings for one client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server TCP port.
    pub port: u16,
    /// Maximum number of connection attempts per `connect` call.
    pub attempts: u32,
    /// Pause between attempts; also scales the wall-clock budget.
    pub retry_interval: Duration,
    /// Driver identifier for the create-controller bootstrap.
    pub driver: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: DEFAULT_PORT,
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            driver: DEFAULT_DRIVER.to_owned(),
        }
    }
}

/// Connection state machine surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No socket; `connect` may start a new session.
    Disconnected,
    /// Retry thread is attempting the connection.
    Connecting,
    /// Socket is live and bootstrapped.
    Connected,
}

/// Cooperative cancellation flag for the connect-retry loop, observed
/// at each iteration boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Client-local transport failures; never carried over the wire.
#[derive(Debug, Error)]
pub enum ClientError {
    /// `send` was called without a live connection.
    #[error("client is not connected")]
    NotConnected,
    /// Frame exceeds the fixed chunk ceiling; nothing was transmitted.
    #[error("request frame of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte ceiling")]
    PayloadTooLarge {
        /// Encoded frame length.
        len: usize,
    },
    /// Zero-length read or socket failure; the socket has been closed.
    #[error("connection is lost")]
    ConnectionLost,
    /// The retry loop gave up without establishing a connection.
    #[error("gave up after {attempts} connection attempts")]
    RetriesExhausted {
        /// Configured attempt budget.
        attempts: u32,
    },
    /// Frame codec failure.
    #[error("wire codec failure")]
    Wire(#[from] WireError),
}

#[derive(Debug)]
struct Shared {
    state: LinkState,
    stream: Option<TcpStream>,
}

impl Shared {
    fn drop_connection(&mut self) {
        self.stream = None;
        self.state = LinkState::Disconnected;
    }
}

/// Client endpoint of the register protocol.
#[derive(Debug)]
pub struct BoardClient {
    config: ClientConfig,
    shared: Arc<Mutex<Shared>>,
    cancel: CancelToken,
    retry: Option<JoinHandle<()>>,
}

impl BoardClient {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: LinkState::Disconnected,
                stream: None,
            })),
            cancel: CancelToken::new(),
            retry: None,
        }
    }

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> LinkState {
        self.shared
            .lock()
            .map_or(LinkState::Disconnected, |guard| guard.state)
    }

    /// Returns a handle to the cancellation token of the current
    /// connect session.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Starts the connect-retry loop on its own thread and returns
    /// immediately.
    ///
    /// A no-op when a session is already connecting or connected. On
    /// success the retry thread issues the create-controller bootstrap
    /// before it exits.
    pub fn connect(&mut self) {
        {
            let Ok(mut guard) = self.shared.lock() else {
                return;
            };
            if guard.state != LinkState::Disconnected {
                warn!("can't connect during another connection session");
                return;
            }
            guard.state = LinkState::Connecting;
        }
        info!(
            "connecting to the server {}:{}...",
            self.config.host, self.config.port
        );
        self.cancel = CancelToken::new();
        let config = self.config.clone();
        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let handle = thread::Builder::new()
            .name("connect-retry".to_owned())
            .spawn(move || retry_loop(&config, &shared, &cancel));
        match handle {
            Ok(handle) => self.retry = Some(handle),
            Err(err) => {
                warn!("failed to spawn the retry thread: {err}");
                if let Ok(mut guard) = self.shared.lock() {
                    guard.drop_connection();
                }
            }
        }
    }

    /// Connects and blocks until the retry loop settles.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::RetriesExhausted`] when the loop gave up
    /// or was cancelled before a connection was established.
    pub fn connect_blocking(&mut self) -> Result<(), ClientError> {
        self.connect();
        if let Some(handle) = self.retry.take() {
            if handle.join().is_err() {
                warn!("retry thread panicked");
            }
        }
        match self.state() {
            LinkState::Connected => Ok(()),
            LinkState::Disconnected | LinkState::Connecting => Err(ClientError::RetriesExhausted {
                attempts: self.config.attempts,
            }),
        }
    }

    /// Sends one data request and blocks for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotConnected`] without a live session,
    /// [`ClientError::PayloadTooLarge`] when the frame exceeds the chunk
    /// ceiling (nothing is transmitted), and
    /// [`ClientError::ConnectionLost`] on a zero-length read or socket
    /// failure, after which the socket is closed.
    pub fn send(&mut self, request: Request) -> Result<Response, ClientError> {
        transact(&self.shared, &Frame::Data(request))
    }

    /// Asks the server whether it is alive.
    ///
    /// # Errors
    ///
    /// Propagates transport failures; a non-`Ack` reply is reported as
    /// [`ClientError::ConnectionLost`] since the session is unusable.
    pub fn check_alive(&mut self) -> Result<(), ClientError> {
        match transact(&self.shared, &Frame::Control(ControlRequest::CheckAlive))? {
            Response::Ack => {
                info!(
                    "server is alive at {}:{}",
                    self.config.host, self.config.port
                );
                Ok(())
            }
            other => {
                warn!("unexpected liveness reply: {other:?}");
                Err(ClientError::ConnectionLost)
            }
        }
    }

    /// Asks the remote process to shut down, then closes the session.
    ///
    /// # Errors
    ///
    /// Propagates transport failures from the stop request.
    pub fn stop_server(&mut self) -> Result<(), ClientError> {
        info!("trying to shut down the server");
        let outcome = transact(&self.shared, &Frame::Control(ControlRequest::StopServer));
        self.close();
        match outcome? {
            Response::Ack => {
                info!("the server is not running now");
                Ok(())
            }
            other => {
                warn!("unexpected stop reply: {other:?}");
                Ok(())
            }
        }
    }

    /// Cancels any in-flight connect session, releases the socket, and
    /// resets the state machine. A no-op when already disconnected.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.retry.take() {
            if handle.join().is_err() {
                warn!("retry thread panicked");
            }
        }
        if let Ok(mut guard) = self.shared.lock() {
            if guard.state != LinkState::Disconnected {
                info!("connection closed");
            }
            guard.drop_connection();
        }
    }
}

impl Drop for BoardClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn retry_loop(config: &ClientConfig, shared: &Arc<Mutex<Shared>>, cancel: &CancelToken) {
    let start = Instant::now();
    let budget = config.retry_interval * config.attempts;
    for attempt in 1..=config.attempts {
        if cancel.is_cancelled() {
            info!("connection attempt cancelled");
            break;
        }
        if start.elapsed() > budget {
            warn!("there is no more time for connection attempts");
            break;
        }
        debug!("connection attempt {attempt}");
        match TcpStream::connect((config.host.as_str(), config.port)) {
            Ok(stream) => {
                if let Ok(mut guard) = shared.lock() {
                    guard.stream = Some(stream);
                    guard.state = LinkState::Connected;
                } else {
                    return;
                }
                info!("connected successfully");
                bootstrap(config, shared);
                return;
            }
            Err(err) => {
                debug!("attempt {attempt} failed: {err}");
                thread::sleep(config.retry_interval);
            }
        }
    }
    warn!("there are no more attempts or time");
    if let Ok(mut guard) = shared.lock() {
        guard.drop_connection();
    }
}

/// Issues the create-controller bootstrap right after connecting.
fn bootstrap(config: &ClientConfig, shared: &Arc<Mutex<Shared>>) {
    info!("trying to create the memory controller on the server");
    let frame = Frame::Control(ControlRequest::CreateController {
        driver: config.driver.clone(),
    });
    match transact(shared, &frame) {
        Ok(Response::Ack) => info!("memory controller has been created"),
        Ok(other) => warn!("unexpected bootstrap reply: {other:?}"),
        Err(err) => warn!("bootstrap failed: {err}"),
    }
}

/// One write per request, one read per reply. Frames fit the chunk
/// ceiling and are transmitted whole; each reply is taken from a
/// single read, so a short read would desync the stream.
fn transact(shared: &Mutex<Shared>, frame: &Frame) -> Result<Response, ClientError> {
    let bytes = encode_frame(frame)?;
    if bytes.len() > MAX_FRAME_BYTES {
        warn!("can't transmit {} bytes, frame is too big", bytes.len());
        return Err(ClientError::PayloadTooLarge { len: bytes.len() });
    }

    let mut guard = shared.lock().map_err(|_| ClientError::ConnectionLost)?;
    if guard.state != LinkState::Connected {
        return Err(ClientError::NotConnected);
    }
    let Some(stream) = guard.stream.as_mut() else {
        return Err(ClientError::NotConnected);
    };

    if let Err(err) = stream.write_all(&bytes) {
        warn!("transmit failed: {err}");
        guard.drop_connection();
        return Err(ClientError::ConnectionLost);
    }
    debug!("data transmitted successfully");

    let mut buf = [0_u8; MAX_FRAME_BYTES];
    match stream.read(&mut buf) {
        Ok(0) => {
            info!("connection is lost");
            guard.drop_connection();
            Err(ClientError::ConnectionLost)
        }
        Ok(n) => {
            debug!("data received successfully");
            Ok(decode_response(&buf[..n])?)
        }
        Err(err) => {
            warn!("receive failed: {err}");
            guard.drop_connection();
            Err(ClientError::ConnectionLost)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::{BoardClient, CancelToken, ClientConfig, ClientError, LinkState};
    use memra_core::protocol::Request;
    use memra_core::regmap::STATUS_ADDR;

    fn unreachable_config() -> ClientConfig {
        ClientConfig {
            host: "127.0.0.1".to_owned(),
            // Reserved port that nothing in the test binds.
            port: 1,
            attempts: 2,
            retry_interval: Duration::from_millis(5),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn new_client_is_disconnected() {
        let client = BoardClient::new(ClientConfig::default());
        assert_eq!(client.state(), LinkState::Disconnected);
    }

    #[test]
    fn send_without_connection_is_rejected() {
        let mut client = BoardClient::new(ClientConfig::default());
        let outcome = client.send(Request::ReadWord { addr: STATUS_ADDR });
        assert!(matches!(outcome, Err(ClientError::NotConnected)));
    }

    #[test]
    fn retry_loop_gives_up_and_resets_state() {
        let mut client = BoardClient::new(unreachable_config());
        let outcome = client.connect_blocking();
        assert!(matches!(
            outcome,
            Err(ClientError::RetriesExhausted { attempts: 2 })
        ));
        assert_eq!(client.state(), LinkState::Disconnected);
    }

    #[test]
    fn cancellation_token_reports_after_cancel() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancel_stops_an_active_retry_loop() {
        // 200 attempts of 25 ms each is a five-second budget; the
        // token must cut the loop short at an iteration boundary.
        let mut client = BoardClient::new(ClientConfig {
            host: "127.0.0.1".to_owned(),
            port: 1,
            attempts: 200,
            retry_interval: Duration::from_millis(25),
            ..ClientConfig::default()
        });
        let start = Instant::now();
        client.connect();
        client.cancel_token().cancel();

        // The retry thread resets the state machine on its own; no
        // close() is involved.
        let deadline = Instant::now() + Duration::from_secs(2);
        while client.state() != LinkState::Disconnected && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(client.state(), LinkState::Disconnected);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn close_when_disconnected_is_a_noop() {
        let mut client = BoardClient::new(ClientConfig::default());
        client.close();
        client.close();
        assert_eq!(client.state(), LinkState::Disconnected);
    }
}
