//! Scripted in-memory link used by the session tests

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{Connector, Transport};
use crate::core::{DeviceConfig, Error, Result};
use crate::protocol::{decode, encode, Message};

/// What the next read returns
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// One burst of bytes
    Data(Vec<u8>),
    /// Read times out with nothing received
    Silence,
    /// Read fails
    Fail,
}

#[derive(Debug, Default)]
struct Inner {
    reads: VecDeque<Step>,
    writes: Vec<Vec<u8>>,
    fail_writes: bool,
    connect_error: Option<io::ErrorKind>,
    connects: usize,
    open: bool,
}

/// Both ends of a scripted link. Clones share state.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockLink {
    inner: Arc<Mutex<Inner>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn push_message(&self, message: Message) -> &Self {
        self.push_bytes(encode(&message).to_vec())
    }

    pub fn push_bytes(&self, bytes: Vec<u8>) -> &Self {
        self.lock().reads.push_back(Step::Data(bytes));
        self
    }

    pub fn push_silence(&self) -> &Self {
        self.lock().reads.push_back(Step::Silence);
        self
    }

    pub fn push_read_failure(&self) -> &Self {
        self.lock().reads.push_back(Step::Fail);
        self
    }

    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn fail_connect(&self, kind: Option<io::ErrorKind>) {
        self.lock().connect_error = kind;
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn pending_reads(&self) -> usize {
        self.lock().reads.len()
    }

    /// Everything written so far, decoded
    pub fn written(&self) -> Vec<Message> {
        self.lock()
            .writes
            .iter()
            .map(|bytes| decode(bytes).expect("host wrote a malformed frame").message)
            .collect()
    }

    pub fn clear_written(&self) {
        self.lock().writes.clear();
    }
}

impl Connector for MockLink {
    type Transport = MockTransport;

    fn connect(&self, _config: &DeviceConfig) -> Result<MockTransport> {
        let mut inner = self.lock();
        inner.connects += 1;
        if let Some(kind) = inner.connect_error {
            return Err(Error::Io(io::Error::new(kind, "scripted connect failure")));
        }
        inner.open = true;
        Ok(MockTransport { link: self.clone() })
    }
}

/// Device side of a [`MockLink`]
#[derive(Debug)]
pub(crate) struct MockTransport {
    link: MockLink,
}

impl Transport for MockTransport {
    fn write(&mut self, bytes: &[u8], _timeout: Duration) -> io::Result<()> {
        let mut inner = self.link.lock();
        if !inner.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        if inner.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "scripted write failure"));
        }
        inner.writes.push(bytes.to_vec());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let step = {
            let mut inner = self.link.lock();
            if !inner.open {
                return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
            }
            inner.reads.pop_front()
        };

        match step {
            Some(Step::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Step::Fail) => Err(io::Error::new(io::ErrorKind::Other, "scripted read failure")),
            Some(Step::Silence) | None => {
                // Keep idle listen loops from spinning hot
                let nap = if timeout.is_zero() {
                    Duration::from_millis(2)
                } else {
                    timeout.min(Duration::from_millis(2))
                };
                std::thread::sleep(nap);
                Ok(0)
            }
        }
    }

    fn close(&mut self) {
        self.link.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.link.lock().open
    }
}
