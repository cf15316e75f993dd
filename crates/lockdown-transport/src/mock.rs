//! In-memory [`DeviceConnection`] test double: a pair of connected ends
//! backed by byte queues, so Transport Adapter and framing tests don't need
//! a real USB multiplexer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::core::{DeviceConnection, TransportError};

#[derive(Default)]
struct Pipe {
    buf: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory device connection. Bytes written on this end
/// become readable on the paired end, and vice versa.
pub struct MockDeviceConnection {
    outbound: Arc<Mutex<Pipe>>,
    inbound: Arc<Mutex<Pipe>>,
}

impl MockDeviceConnection {
    /// Create two connected ends: writes to one are reads on the other.
    pub fn paired() -> (Self, Self) {
        let a_to_b = Arc::new(Mutex::new(Pipe::default()));
        let b_to_a = Arc::new(Mutex::new(Pipe::default()));
        let a = Self {
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
        };
        let b = Self {
            outbound: b_to_a,
            inbound: a_to_b,
        };
        (a, b)
    }

    /// Mark this end's outbound pipe as closed, so the peer observes EOF
    /// once it has drained any bytes already written.
    pub fn close(&self) {
        self.outbound.lock().unwrap().closed = true;
    }
}

#[async_trait::async_trait]
impl DeviceConnection for MockDeviceConnection {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            {
                let mut pipe = self.inbound.lock().unwrap();
                if !pipe.buf.is_empty() {
                    let n = buf.len().min(pipe.buf.len());
                    for slot in buf.iter_mut().take(n) {
                        *slot = pipe.buf.pop_front().unwrap();
                    }
                    return Ok(n);
                }
                if pipe.closed {
                    return Ok(0);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let mut pipe = self.outbound.lock().unwrap();
        if pipe.closed {
            return Err(TransportError::Connection("write after close".to_string()));
        }
        pipe.buf.extend(buf.iter().copied());
        Ok(())
    }
}
