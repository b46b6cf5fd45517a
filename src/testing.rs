//! In-memory serial device used by the unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

use crate::transport::{Connector, PortSettings, SerialLink};

#[derive(Default)]
struct WireState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<(Instant, Vec<u8>)>,
    opens: usize,
    closes: usize,
    clears: usize,
    refuse_open: bool,
    failing_writes: usize,
    failing_match: Option<Vec<u8>>,
    hung_up: bool,
}

/// Shared view on one simulated device.
#[derive(Clone, Default)]
pub struct MockWire {
    state: Arc<Mutex<WireState>>,
}

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn push_bytes(&self, data: &[u8]) {
        self.lock().incoming.push_back(data.to_vec());
    }

    pub fn push_line(&self, line: &str) {
        self.push_bytes(format!("{}\r\n", line).as_bytes());
    }

    /// Reads return end of stream once the queued input is consumed
    pub fn hang_up(&self) {
        self.lock().hung_up = true;
    }

    pub fn refuse_open(&self) {
        self.lock().refuse_open = true;
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Fail the next write of exactly `data`
    pub fn fail_next_matching(&self, data: &[u8]) {
        self.lock().failing_match = Some(data.to_vec());
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.iter().map(|(_, data)| data.clone()).collect()
    }

    pub fn written_at(&self) -> Vec<(Instant, Vec<u8>)> {
        self.lock().written.clone()
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    /// Buffer clears requested on any link of this device
    pub fn clears(&self) -> usize {
        self.lock().clears
    }

    fn lock(&self) -> MutexGuard<'_, WireState> {
        self.state.lock().unwrap()
    }
}

impl Connector for MockWire {
    fn connect(&self, settings: &PortSettings) -> io::Result<Box<dyn SerialLink>> {
        let mut state = self.lock();
        if state.refuse_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        state.opens += 1;
        Ok(Box::new(MockLink {
            wire: self.clone(),
            poll_interval: settings.poll_interval,
        }))
    }
}

struct MockLink {
    wire: MockWire,
    poll_interval: Duration,
}

impl SerialLink for MockLink {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        {
            let mut state = self.wire.lock();
            if let Some(mut chunk) = state.incoming.pop_front() {
                let n = chunk.len().min(buffer.len());
                buffer[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.incoming.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
            if state.hung_up {
                return Ok(0);
            }
        }
        sleep(self.poll_interval);
        Err(io::Error::new(io::ErrorKind::TimedOut, "poll interval elapsed"))
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        let mut state = self.wire.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "board unplugged"));
        }
        if state.failing_match.as_deref() == Some(data) {
            state.failing_match = None;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "board unplugged"));
        }
        state.written.push((Instant::now(), data.to_vec()));
        Ok(())
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.wire.lock().clears += 1;
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.wire.lock().closes += 1;
    }
}
