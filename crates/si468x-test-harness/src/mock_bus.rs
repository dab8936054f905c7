//! Mock bus for deterministic testing of the command engine.
//!
//! [`MockTransport`] implements the [`Transport`] trait with pre-loaded
//! write/reply pairs. This lets you test command framing, the CTS poll
//! fallback, and reply parsing without a chip on the bus.
//!
//! The mock is a cheap handle: clone it before boxing it into the driver
//! and keep the clone to inspect what was written.
//!
//! # Example
//!
//! ```
//! use si468x_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // GET_PROPERTY 0x0000: the command write itself gets no reply...
//! mock.expect(&[0x14, 0x01, 0x00, 0x00], &[]);
//! // ...the following RD_REPLY write is answered with six bytes.
//! mock.expect(&[0x00], &[0x80, 0x00, 0x00, 0xC0, 0x85, 0x00]);
//! assert_eq!(mock.remaining_expectations(), 2);
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use si468x_core::error::{Error, Result};
use si468x_core::transport::Transport;

/// A pre-loaded write/reply pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be written.
    request: Vec<u8>,
    /// The bytes returned by the next `read()` after the matching write.
    response: Vec<u8>,
}

#[derive(Debug, Default)]
struct Inner {
    expectations: VecDeque<Expectation>,
    pending_response: Option<Vec<u8>>,
    disconnected: bool,
    sent_log: Vec<Vec<u8>>,
    read_log: Vec<usize>,
}

/// A mock [`Transport`] for testing the driver without hardware.
///
/// Expectations are consumed in order. When `write()` is called, the data is
/// recorded and matched against the next expectation. The corresponding
/// response is then returned by the next `read()` call, zero-padded or
/// truncated to the requested length.
///
/// A write that matches no expectation, or a read with no pending response,
/// fails with [`Error::Protocol`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    /// Create a new, connected mock transport with no expectations.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an expected write and the reply for the read that follows it.
    ///
    /// Pass an empty `response` for writes that are not followed by a read
    /// (command frames).
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue a full command exchange that completes through the poll path.
    ///
    /// Expects the command frame, then a 2-byte status poll answered with
    /// the first two bytes of `reply`, then the RD_REPLY read of `reply`.
    pub fn expect_command(&self, frame: &[u8], reply: &[u8]) {
        let status = [
            reply.first().copied().unwrap_or(0),
            reply.get(1).copied().unwrap_or(0),
        ];
        self.expect_command_with_status(frame, &status, reply);
    }

    /// Like [`expect_command`](Self::expect_command) but with an explicit
    /// status word for the poll.
    pub fn expect_command_with_status(&self, frame: &[u8], status: &[u8; 2], reply: &[u8]) {
        self.expect(frame, &[]);
        self.expect(&[0x00], status);
        self.expect(&[0x00], reply);
    }

    /// Queue one status read as performed by the interrupt dispatcher.
    pub fn expect_status(&self, status: &[u8; 2]) {
        self.expect(&[0x00], status);
    }

    /// All data written through this transport, one entry per `write()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Requested lengths of every `read()`.
    pub fn read_lengths(&self) -> Vec<usize> {
        self.lock().read_log.clone()
    }

    /// Number of writes performed so far.
    pub fn write_count(&self) -> usize {
        self.lock().sent_log.len()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Simulate the bus going away. While disconnected every `write()` and
    /// `read()` fails with [`Error::Transport`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().disconnected = !connected;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut inner = self.lock();
        if inner.disconnected {
            return Err(Error::Transport("bus disconnected".into()));
        }

        inner.sent_log.push(data.to_vec());

        match inner.expectations.pop_front() {
            Some(expectation) => {
                if data != expectation.request.as_slice() {
                    return Err(Error::Protocol(format!(
                        "unexpected write: expected {:02X?}, got {:02X?}",
                        expectation.request, data
                    )));
                }
                inner.pending_response = if expectation.response.is_empty() {
                    None
                } else {
                    Some(expectation.response)
                };
                Ok(data.len())
            }
            None => Err(Error::Protocol(format!(
                "no more expectations in mock transport (write {data:02X?})"
            ))),
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.lock();
        if inner.disconnected {
            return Err(Error::Transport("bus disconnected".into()));
        }
        inner.read_log.push(buf.len());

        match inner.pending_response.take() {
            Some(response) => {
                buf.fill(0);
                let n = response.len().min(buf.len());
                buf[..n].copy_from_slice(&response[..n]);
                Ok(buf.len())
            }
            None => Err(Error::Protocol("read without a pending response".into())),
        }
    }
}
