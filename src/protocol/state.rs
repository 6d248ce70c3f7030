use std::iter::FusedIterator;
use std::time::Duration;

use bytes::BytesMut;
use tokio_util::codec::Encoder;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::{decode, FrameCodec};
use super::message::{Message, MessageKind, ReplyKind};
use super::rc_code::RcCodeData;
use super::FRAME_SIZE;
use crate::core::{DeviceConfig, Error, Result, StateError};
use crate::transport::{Connector, GrantedAccess, PortAccess, Transport};

/// Receive buffer size. Larger than a frame so oversized bursts are noticed.
const READ_BUFFER_SIZE: usize = 64;

/// Lifecycle of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never opened
    Uninitialized,
    /// Acquiring the transport and running the handshake
    Opening,
    /// Open, ready for requests
    Idle,
    /// Device is in receive mode
    Listening,
    /// Closed explicitly or by a fatal I/O error
    Closed,
}

impl SessionState {
    /// Returns true if the session owns an open transport
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Listening)
    }
}

/// Protocol state machine for one relay session.
///
/// The device exclusively owns its transport. While a [`Listen`] loop is alive it
/// mutably borrows the device, so nothing else can be sent until the loop has
/// observed cancellation and been dropped.
pub struct Device<C: Connector> {
    /// Source of new transports
    connector: C,
    /// Permission gate consulted before opening
    access: Box<dyn PortAccess>,
    /// Session configuration
    config: DeviceConfig,
    /// Open transport, if any
    transport: Option<C::Transport>,
    /// Current state
    state: SessionState,
    /// Cancellation signal of the current listen loop
    cancel: CancellationToken,
    /// Outbound frame encoder
    codec: FrameCodec,
    /// Buffer for inbound bursts
    read_buf: [u8; READ_BUFFER_SIZE],
    /// Buffer for outbound frames
    write_buf: BytesMut,
}

impl<C: Connector> Device<C> {
    /// Creates an unopened device
    pub fn new(connector: C, config: DeviceConfig) -> Self {
        Device {
            connector,
            access: Box::new(GrantedAccess),
            config,
            transport: None,
            state: SessionState::Uninitialized,
            cancel: CancellationToken::new(),
            codec: FrameCodec::new(),
            read_buf: [0u8; READ_BUFFER_SIZE],
            write_buf: BytesMut::with_capacity(FRAME_SIZE),
        }
    }

    /// Replaces the permission gate consulted by [`Device::open`]
    pub fn with_access(mut self, access: impl PortAccess + 'static) -> Self {
        self.access = Box::new(access);
        self
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true if the session is open
    pub fn is_open(&self) -> bool {
        self.state.is_open() && self.transport.as_ref().map_or(false, |t| t.is_open())
    }

    /// Returns true if the device is in listen mode
    pub fn is_listening(&self) -> bool {
        self.state == SessionState::Listening
    }

    /// Session configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Bounds listen-mode reads, and with them the cancellation latency.
    /// Takes effect on the next read.
    pub fn set_listen_poll_interval(&mut self, interval: Option<Duration>) {
        self.config.listen_poll_interval = interval;
    }

    /// Opens the session and brings the device into a known idle state.
    ///
    /// Any previously open session is closed first. `PermissionPending` leaves the
    /// device unopened and may be retried; an I/O failure closes the session.
    pub fn open(&mut self) -> Result<()> {
        if self.transport.is_some() {
            info!("Closing previous session before reopening");
            self.close();
        }

        self.config.validate()?;
        let previous = self.state;

        if let Err(e) = self.access.request(&self.config.port_name) {
            warn!("Cannot open {} yet: {}", self.config.port_name, e);
            return Err(e);
        }

        self.state = SessionState::Opening;
        let transport = match self.connector.connect(&self.config) {
            Ok(transport) => transport,
            Err(e) if e.is_recoverable() => {
                warn!("Cannot open {} yet: {}", self.config.port_name, e);
                self.state = previous;
                return Err(e);
            }
            Err(e) => {
                error!("Failed to open {}: {}", self.config.port_name, e);
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        self.transport = Some(transport);
        self.cancel = CancellationToken::new();

        // Read/write failures have already torn the session down
        self.handshake()?;

        self.state = SessionState::Idle;
        info!("Device on {} initialized", self.config.port_name);
        Ok(())
    }

    /// Resets a device that did not announce itself as ready
    fn handshake(&mut self) -> Result<()> {
        let n = self.read_burst(self.config.handshake_timeout)?;
        let ready = n == FRAME_SIZE
            && matches!(
                decode(&self.read_buf[..n]),
                Ok(frame) if frame.message == Message::Ready && frame.verify_checksum()
            );

        if ready {
            debug!("Device announced Ready");
            return Ok(());
        }

        // Device may still be in a mode left over from an earlier session
        warn!("Device did not announce Ready ({} bytes), resetting it", n);
        self.write_message(Message::Reply(ReplyKind::Ok))?;
        self.write_message(Message::Stop)
    }

    /// Transmits a code through the device.
    ///
    /// Fails with `AlreadyListening` while in listen mode; the caller must stop
    /// listening first. The device reply only paces the exchange.
    pub fn send_code(&mut self, code: RcCodeData) -> Result<()> {
        self.ensure_idle()?;
        self.exchange(Message::TxRequest(code))?;
        info!("Sent code {}", code.code);
        Ok(())
    }

    /// Writes `message` and waits up to the reply timeout for one valid inbound
    /// message. Returns `Ok(None)` if nothing valid arrived in time.
    pub fn send_and_await(&mut self, message: Message) -> Result<Option<Message>> {
        self.ensure_idle()?;
        self.exchange(message)
    }

    /// Request/reply exchanges are only allowed outside listen mode
    fn ensure_idle(&self) -> Result<()> {
        match self.state {
            SessionState::Idle => Ok(()),
            SessionState::Listening => {
                warn!("Refusing to send while listening");
                Err(StateError::AlreadyListening.into())
            }
            _ => Err(StateError::NotInitialized.into()),
        }
    }

    /// Puts the device in listen mode.
    ///
    /// The returned iterator yields every code the device reports until `cancel`
    /// is observed between two reads. With no listen poll interval configured the
    /// reads block, so cancellation takes effect only after the next inbound frame.
    pub fn start_listening(&mut self, cancel: CancellationToken) -> Result<Listen<'_, C>> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Listening => return Err(StateError::AlreadyListening.into()),
            _ => return Err(StateError::NotInitialized.into()),
        }

        self.write_message(Message::RxRequest)?;
        self.cancel = cancel;
        self.state = SessionState::Listening;
        info!("Started listening");

        Ok(Listen {
            device: self,
            done: false,
        })
    }

    /// Cancels listen mode and tells the device to stop receiving
    pub fn stop_listening(&mut self) -> Result<()> {
        match self.state {
            SessionState::Listening => {}
            SessionState::Idle => {
                warn!("Not listening");
                return Err(StateError::NotListening.into());
            }
            _ => {
                warn!("Not listening, device is not initialized");
                return Err(StateError::NotInitialized.into());
            }
        }

        self.cancel.cancel();
        self.exchange(Message::Stop)?;
        self.state = SessionState::Idle;
        info!("Stopped listening");
        Ok(())
    }

    /// Closes the session. Safe to call more than once.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(mut transport) = self.transport.take() {
            info!("Closing device");
            transport.close();
        }
        self.state = SessionState::Closed;
    }

    fn exchange(&mut self, message: Message) -> Result<Option<Message>> {
        self.write_message(message)?;

        let reply = self.receive(self.config.reply_timeout)?;
        if reply.is_none() {
            warn!("No reply to {:?}", message.kind());
        }
        Ok(reply)
    }

    /// Encodes and writes one frame. A failure closes the session.
    fn write_message(&mut self, message: Message) -> Result<()> {
        self.write_buf.clear();
        self.codec.encode(message, &mut self.write_buf)?;

        let transport = self
            .transport
            .as_mut()
            .ok_or(StateError::NotInitialized)?;

        debug!("-> {}", message);
        if let Err(e) = transport.write(&self.write_buf, self.config.write_timeout) {
            error!("Failed to send {:?}: {}", message.kind(), e);
            self.close();
            return Err(Error::Io(e));
        }
        Ok(())
    }

    /// Reads one inbound burst into the read buffer. A failure closes the session.
    fn read_burst(&mut self, timeout: Duration) -> Result<usize> {
        let transport = self
            .transport
            .as_mut()
            .ok_or(StateError::NotInitialized)?;

        match transport.read(&mut self.read_buf, timeout) {
            Ok(n) => Ok(n),
            Err(e) => {
                error!("Failed to read from device: {}", e);
                self.close();
                Err(Error::Io(e))
            }
        }
    }

    /// Reads and validates one inbound message.
    ///
    /// Malformed or corrupt frames are answered with a diagnostic reply and
    /// discarded; only I/O errors escape.
    fn receive(&mut self, timeout: Duration) -> Result<Option<Message>> {
        let n = self.read_burst(timeout)?;
        if n == 0 {
            return Ok(None);
        }

        let frame = match decode(&self.read_buf[..n]) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Discarding inbound frame: {}", err);
                self.write_message(Message::Reply(ReplyKind::from(&err)))?;
                return Ok(None);
            }
        };

        // Replies are accepted without checking their checksum
        if frame.message.kind() != MessageKind::Reply {
            if let Err(err) = frame.check_integrity() {
                warn!("Discarding {:?}: {}", frame.message.kind(), err);
                self.write_message(Message::Reply(ReplyKind::BadCrc))?;
                return Ok(None);
            }
        }

        debug!("<- {}", frame.message);
        Ok(Some(frame.message))
    }
}

impl<C: Connector> Drop for Device<C> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Codes streamed by a device in listen mode.
///
/// Yields `Err` at most once, for a fatal I/O error, after which the session is
/// closed and the iterator is exhausted. Dropping the iterator leaves the device
/// in listen mode; call [`Device::stop_listening`] to return to idle.
pub struct Listen<'a, C: Connector> {
    device: &'a mut Device<C>,
    done: bool,
}

impl<C: Connector> Listen<'_, C> {
    /// Token that ends this loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.device.cancel.clone()
    }
}

impl<C: Connector> Iterator for Listen<'_, C> {
    type Item = Result<RcCodeData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            if self.device.cancel.is_cancelled() {
                debug!("Listen loop observed cancellation");
                self.done = true;
                return None;
            }

            let timeout = self.device.config.listen_timeout();
            let message = match self.device.receive(timeout) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            let Some(&code) = message.rc_code() else {
                debug!("Ignoring {} while listening", message);
                continue;
            };

            if let Err(e) = self.device.write_message(Message::Reply(ReplyKind::Ok)) {
                self.done = true;
                return Some(Err(e));
            }

            info!("Received code {}", code.code);
            return Some(Ok(code));
        }
    }
}

impl<C: Connector> FusedIterator for Listen<'_, C> {}
