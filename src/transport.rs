// Byte-oriented serial transport shared by the arm and base drivers
//
// The core only ever talks to hardware through the `Transport` trait.
// `SerialTransport` is the real implementation on top of `serialport`.

use serialport::{self, DataBits, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Default read timeout for a single `read` call
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Error types for transport I/O
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Duplex byte channel to a controller
pub trait Transport: Send {
    /// Write all bytes and flush them to the wire
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `max` bytes. An empty vector means nothing arrived before the timeout.
    fn read(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Discard anything pending in the inbound buffer
    fn flush_inbound(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        (**self).read(max)
    }

    fn flush_inbound(&mut self) -> Result<()> {
        (**self).flush_inbound()
    }
}

/// Serial port transport (8N1)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a port with the default read timeout
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        Self::open_with_timeout(port_name, baudrate, Duration::from_millis(DEFAULT_TIMEOUT_MS))
    }

    pub fn open_with_timeout(port_name: &str, baudrate: u32, timeout: Duration) -> Result<Self> {
        debug!("Opening serial port {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open()?;

        Ok(Self { port })
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX {:02X?}", bytes);
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; max];
        match self.port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                trace!("RX {:02X?}", buf);
                Ok(buf)
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn flush_inbound(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

/// Shared flag used to abort long blocking loops (handshake, arrival polling)
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Clear a previous cancellation so the token can be reused
    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted transport: each queued chunk is returned by one `read` call.
    ///
    /// `push_read` data is already waiting on the line and is dropped by
    /// `flush_inbound`. `schedule_read` data arrives one chunk per `read`
    /// call, after any flush that came before it.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<MockInner>>,
    }

    #[derive(Default)]
    struct MockInner {
        inbound: VecDeque<Vec<u8>>,
        scheduled: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
        echo: bool,
        flushes: usize,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every write is queued back as the next read
        pub fn echoing() -> Self {
            let mock = Self::default();
            mock.inner.lock().unwrap().echo = true;
            mock
        }

        pub fn push_read(&self, chunk: &[u8]) {
            self.inner.lock().unwrap().inbound.push_back(chunk.to_vec());
        }

        pub fn schedule_read(&self, chunk: &[u8]) {
            self.inner.lock().unwrap().scheduled.push_back(chunk.to_vec());
        }

        pub fn written(&self) -> Vec<Vec<u8>> {
            self.inner.lock().unwrap().written.clone()
        }

        pub fn written_bytes(&self) -> Vec<u8> {
            self.written().concat()
        }

        pub fn flushes(&self) -> usize {
            self.inner.lock().unwrap().flushes
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.written.push(bytes.to_vec());
            if inner.echo {
                inner.inbound.push_back(bytes.to_vec());
            }
            Ok(())
        }

        fn read(&mut self, max: usize) -> Result<Vec<u8>> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(arrived) = inner.scheduled.pop_front() {
                inner.inbound.push_back(arrived);
            }
            match inner.inbound.pop_front() {
                Some(mut chunk) => {
                    if chunk.len() > max {
                        let rest = chunk.split_off(max);
                        inner.inbound.push_front(rest);
                    }
                    Ok(chunk)
                }
                None => Ok(Vec::new()),
            }
        }

        fn flush_inbound(&mut self) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.inbound.clear();
            inner.flushes += 1;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[test]
    fn test_mock_splits_long_chunks() {
        let mut t = MockTransport::new();
        t.push_read(&[1, 2, 3, 4, 5]);
        assert_eq!(t.read(3).unwrap(), vec![1, 2, 3]);
        assert_eq!(t.read(3).unwrap(), vec![4, 5]);
        assert!(t.read(3).unwrap().is_empty());
    }

    #[test]
    fn test_mock_flush_discards_pending() {
        let mut t = MockTransport::new();
        t.push_read(b"stale");
        t.schedule_read(b"late");
        t.flush_inbound().unwrap();
        assert_eq!(t.read(16).unwrap(), b"late".to_vec());
        assert!(t.read(16).unwrap().is_empty());
        assert_eq!(t.flushes(), 1);
    }

    #[test]
    fn test_cancel_token_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!token.is_cancelled());
    }
}
