//! Device worker
//!
//! [`DeviceHandle`] runs a [`Device`] on a dedicated thread so async callers never
//! block on serial I/O. Requests travel over a command channel, each answered on its
//! own oneshot channel, and outcomes are published as [`DeviceEvent`]s.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{Error, Result, StateError};
use crate::protocol::{Device, RcCodeData};
use crate::transport::Connector;

/// Listen poll interval used when the device configuration leaves it unset.
/// The worker can only serve a stop request once its listen loop has returned.
pub const HANDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Maximum number of queued requests
const COMMAND_QUEUE_SIZE: usize = 16;

/// Outcome notifications published by the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// An open attempt finished
    Initialized { success: bool },
    /// Listen mode was entered (`enabled`) or left
    ListenMode { enabled: bool, success: bool },
    /// A code transmission finished
    CodeSent { success: bool },
    /// The device captured a code
    CodeReceived(RcCodeData),
}

enum Command {
    Open(oneshot::Sender<Result<()>>),
    StartListening(CancellationToken, oneshot::Sender<Result<()>>),
    StopListening(oneshot::Sender<Result<()>>),
    SendCode(RcCodeData, oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<()>),
}

/// Async front end of a device running on its own thread
pub struct DeviceHandle {
    /// Request queue of the worker
    commands: mpsc::Sender<Command>,
    /// Mirrors the device's listen mode, written by the worker
    listening: Arc<AtomicBool>,
    /// Token of the running listen loop
    cancel: Mutex<Option<CancellationToken>>,
}

impl DeviceHandle {
    /// Moves `device` onto a new worker thread.
    ///
    /// Returns the handle and the stream of events the worker publishes.
    pub fn spawn<C>(mut device: Device<C>) -> Result<(Self, DeviceEvents)>
    where
        C: Connector + 'static,
    {
        if device.config().listen_poll_interval.is_none() {
            device.set_listen_poll_interval(Some(HANDLE_POLL_INTERVAL));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let listening = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            device,
            events: event_tx,
            listening: listening.clone(),
        };
        thread::Builder::new()
            .name("echowave-device".to_string())
            .spawn(move || worker.run(command_rx))?;

        let handle = DeviceHandle {
            commands: command_tx,
            listening,
            cancel: Mutex::new(None),
        };
        Ok((handle, DeviceEvents { rx: event_rx }))
    }

    /// Opens the device, replacing any open session
    pub async fn open(&self) -> Result<()> {
        self.cancel_listen();
        self.request(Command::Open).await?
    }

    /// Enters listen mode, opening the device first if needed.
    ///
    /// Received codes arrive as [`DeviceEvent::CodeReceived`].
    pub async fn start_listening(&self) -> Result<()> {
        // A live token marks a listen loop that is running or about to start
        let token = {
            let mut slot = self.lock_cancel();
            let pending = slot.as_ref().map_or(false, |t| !t.is_cancelled());
            if pending || self.is_listening() {
                return Err(StateError::AlreadyListening.into());
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };

        let result = self
            .request(|reply| Command::StartListening(token.clone(), reply))
            .await
            .and_then(|started| started);
        if result.is_err() {
            token.cancel();
            let mut slot = self.lock_cancel();
            if slot.as_ref().map_or(false, |t| t.is_cancelled()) {
                *slot = None;
            }
        }
        result
    }

    /// Leaves listen mode
    pub async fn stop_listening(&self) -> Result<()> {
        self.cancel_listen();
        self.request(Command::StopListening).await?
    }

    /// Transmits a code, opening the device first if needed.
    /// Listen mode is stopped before sending.
    pub async fn send_code(&self, code: RcCodeData) -> Result<()> {
        if self.is_listening() {
            info!("Stopping listen mode before sending");
            self.stop_listening().await?;
        }
        self.request(|reply| Command::SendCode(code, reply)).await?
    }

    /// Closes the device. The worker keeps running and may reopen it.
    pub async fn close(&self) -> Result<()> {
        self.cancel_listen();
        self.request(Command::Close).await
    }

    /// Returns true while the device is in listen mode
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| worker_gone())?;
        reply_rx.await.map_err(|_| worker_gone())
    }

    fn lock_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.cancel.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cancel_listen(&self) {
        if let Some(token) = self.lock_cancel().take() {
            token.cancel();
        }
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        // Lets the worker leave its listen loop and see the closed queue
        self.cancel_listen();
    }
}

fn worker_gone() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "device worker has stopped",
    ))
}

/// Events published by a [`DeviceHandle`]'s worker
pub struct DeviceEvents {
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl DeviceEvents {
    /// Waits for the next event. Returns `None` once the worker has stopped.
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.rx.recv().await
    }
}

impl Stream for DeviceEvents {
    type Item = DeviceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<DeviceEvent>> {
        self.rx.poll_recv(cx)
    }
}

fn emit(events: &mpsc::UnboundedSender<DeviceEvent>, event: DeviceEvent) {
    debug!("Event {:?}", event);
    if events.send(event).is_err() {
        debug!("No event subscriber left");
    }
}

struct Worker<C: Connector> {
    device: Device<C>,
    events: mpsc::UnboundedSender<DeviceEvent>,
    listening: Arc<AtomicBool>,
}

impl<C: Connector> Worker<C> {
    fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!("Device worker started");
        while let Some(command) = commands.blocking_recv() {
            self.handle(command);
            self.publish_state();
        }
        self.device.close();
        debug!("Device worker stopped");
    }

    /// Mirrors listen mode to the handle. Runs before every reply so callers
    /// observe the new mode once their request returns.
    fn publish_state(&self) {
        self.listening
            .store(self.device.is_listening(), Ordering::SeqCst);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Open(reply) => {
                let result = self.open();
                self.publish_state();
                let _ = reply.send(result);
            }
            Command::StartListening(cancel, reply) => self.listen(cancel, reply),
            Command::StopListening(reply) => {
                let result = self.device.stop_listening();
                emit(
                    &self.events,
                    DeviceEvent::ListenMode {
                        enabled: false,
                        success: result.is_ok(),
                    },
                );
                self.publish_state();
                let _ = reply.send(result);
            }
            Command::SendCode(code, reply) => {
                let result = self
                    .ensure_open()
                    .and_then(|()| self.device.send_code(code));
                if let Err(e) = &result {
                    warn!("Failed to send code: {}", e);
                }
                emit(
                    &self.events,
                    DeviceEvent::CodeSent {
                        success: result.is_ok(),
                    },
                );
                self.publish_state();
                let _ = reply.send(result);
            }
            Command::Close(reply) => {
                self.device.close();
                self.publish_state();
                let _ = reply.send(());
            }
        }
    }

    fn open(&mut self) -> Result<()> {
        let result = self.device.open();
        if let Err(e) = &result {
            warn!("Failed to initialize device: {}", e);
        }
        emit(
            &self.events,
            DeviceEvent::Initialized {
                success: result.is_ok(),
            },
        );
        result
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.device.is_open() {
            Ok(())
        } else {
            self.open()
        }
    }

    /// Runs a listen loop until it is cancelled or fails
    fn listen(&mut self, cancel: CancellationToken, reply: oneshot::Sender<Result<()>>) {
        let failed = DeviceEvent::ListenMode {
            enabled: true,
            success: false,
        };

        if let Err(e) = self.ensure_open() {
            emit(&self.events, failed);
            self.publish_state();
            let _ = reply.send(Err(e));
            return;
        }

        let listen = match self.device.start_listening(cancel) {
            Ok(listen) => listen,
            Err(e) => {
                warn!("Failed to start listening: {}", e);
                emit(&self.events, failed);
                let _ = reply.send(Err(e));
                return;
            }
        };

        self.listening.store(true, Ordering::SeqCst);
        emit(
            &self.events,
            DeviceEvent::ListenMode {
                enabled: true,
                success: true,
            },
        );
        let _ = reply.send(Ok(()));

        for received in listen {
            match received {
                Ok(code) => emit(&self.events, DeviceEvent::CodeReceived(code)),
                Err(e) => {
                    error!("Listening aborted: {}", e);
                    emit(
                        &self.events,
                        DeviceEvent::ListenMode {
                            enabled: false,
                            success: false,
                        },
                    );
                }
            }
        }
        debug!("Listen loop returned");
    }
}
