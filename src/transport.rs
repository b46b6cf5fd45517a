use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::command::CommandCode;
use crate::error::{GlitchError, Result};

/// Terminator appended to every command sent to a board
pub const LINE_TERMINATOR: &[u8] = b"\n\r";

/// Read timeout of the serial device; bounds the latency of a cancellation
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Unterminated input longer than this is handed out as a line of its own
pub const MAX_LINE_LENGTH: usize = 1024;

const READ_CHUNK: usize = 256;

/// Port name, baud rate and poll interval of one board connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSettings {
    pub port: String,
    pub baud: u32,
    pub poll_interval: Duration,
}

impl PortSettings {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Byte level access to an opened serial device.
///
/// `read_chunk` must return within the poll interval of the connection,
/// either with data or with an `io::ErrorKind::TimedOut` error. A read of
/// zero bytes means the device is gone.
pub trait SerialLink: Send {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush_output(&mut self) -> io::Result<()>;
    fn clear_buffers(&mut self) -> io::Result<()>;
}

/// Opens serial links. Replaced by an in-memory implementation in tests.
pub trait Connector: Send + Sync {
    fn connect(&self, settings: &PortSettings) -> io::Result<Box<dyn SerialLink>>;
}

/// Connector for real serial devices
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemConnector;

impl Connector for SystemConnector {
    fn connect(&self, settings: &PortSettings) -> io::Result<Box<dyn SerialLink>> {
        let port = serialport::new(settings.port.as_str(), settings.baud)
            .timeout(settings.poll_interval)
            .open()?;
        Ok(Box::new(port))
    }
}

impl SerialLink for Box<dyn serialport::SerialPort> {
    fn read_chunk(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buffer)
    }

    fn write_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(self, data)
    }

    fn flush_output(&mut self) -> io::Result<()> {
        Write::flush(self)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

/// Outcome of a cancellable line read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Received {
    /// Complete line without its terminator
    Line(Vec<u8>),
    /// The cancellation predicate fired before a line was complete
    Cancelled,
    /// The device reported end of stream
    Disconnected,
}

/// One serial connection to a board.
///
/// The transport is owned by exactly one loop. It opens lazily on the first
/// send or receive, and releases the device on `close()` or when dropped.
pub struct SerialTransport {
    settings: PortSettings,
    connector: Arc<dyn Connector>,
    link: Option<Box<dyn SerialLink>>,
    pending: Vec<u8>,
}

impl SerialTransport {
    /// Transport for a real serial device
    pub fn new(settings: PortSettings) -> Self {
        Self::with_connector(settings, Arc::new(SystemConnector))
    }

    pub fn with_connector(settings: PortSettings, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            link: None,
            pending: Vec::new(),
        }
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Claim the device and drop whatever is left in its buffers.
    ///
    /// Does nothing if the transport is already open.
    pub fn open(&mut self) -> Result<()> {
        if self.link.is_some() {
            return Ok(());
        }
        let mut link = self
            .connector
            .connect(&self.settings)
            .map_err(|source| GlitchError::Connection {
                port: self.settings.port.clone(),
                source,
            })?;
        link.clear_buffers()
            .map_err(|source| GlitchError::Connection {
                port: self.settings.port.clone(),
                source,
            })?;
        self.pending.clear();
        self.link = Some(link);
        info!(
            "Opened {} at {} baud",
            self.settings.port, self.settings.baud
        );
        Ok(())
    }

    /// Flush and release the device. Returns false if it was not open.
    pub fn close(&mut self) -> bool {
        let Some(mut link) = self.link.take() else {
            return false;
        };
        if let Err(e) = link.flush_output().and_then(|()| link.clear_buffers()) {
            debug!("Ignoring buffer error on close of {}: {}", self.settings.port, e);
        }
        self.pending.clear();
        drop(link);
        info!("Closed {}", self.settings.port);
        true
    }

    /// Discard partially received input and the device buffers
    pub fn reset_buffers(&mut self) -> Result<()> {
        self.pending.clear();
        match self.link.as_mut() {
            Some(link) => link.clear_buffers().map_err(|source| GlitchError::Transport {
                port: self.settings.port.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Write `data` followed by the line terminator and wait for the flush.
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(data.len() + LINE_TERMINATOR.len());
        frame.extend_from_slice(data);
        frame.extend_from_slice(LINE_TERMINATOR);

        let link = self.link()?;
        let result = link.write_bytes(&frame).and_then(|()| link.flush_output());
        result.map_err(|source| GlitchError::Transport {
            port: self.settings.port.clone(),
            source,
        })
    }

    pub fn send_command(&mut self, command: CommandCode) -> Result<()> {
        debug!("{} <- {}", self.settings.port, command);
        self.send(command.encode())
    }

    /// Block until a full line arrived or `cancelled` returns true.
    ///
    /// The device is polled with its read timeout, so a cancellation is seen
    /// at the latest one poll interval after it was requested.
    pub fn receive_line<F>(&mut self, cancelled: F) -> Result<Received>
    where
        F: Fn() -> bool,
    {
        self.link()?;
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            if cancelled() {
                return Ok(Received::Cancelled);
            }
            if let Some(line) = self.take_line() {
                return Ok(Received::Line(line));
            }
            let read = match self.link.as_mut() {
                Some(link) => link.read_chunk(&mut chunk),
                None => return Ok(Received::Disconnected),
            };
            match read {
                Ok(0) => {
                    debug!("End of stream on {}", self.settings.port);
                    return Ok(Received::Disconnected);
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                // Poll interval elapsed without data
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut
                            | io::ErrorKind::WouldBlock
                            | io::ErrorKind::Interrupted
                    ) => {}
                Err(source) => {
                    return Err(GlitchError::Transport {
                        port: self.settings.port.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Probe the device by opening and closing it. Errors are swallowed.
    pub fn is_valid_connection(&mut self) -> bool {
        if self.is_open() {
            return true;
        }
        match self.open() {
            Ok(()) => {
                self.close();
                true
            }
            Err(e) => {
                debug!("Connection probe failed: {}", e);
                false
            }
        }
    }

    fn link(&mut self) -> Result<&mut Box<dyn SerialLink>> {
        self.open()?;
        self.link.as_mut().ok_or_else(|| GlitchError::Connection {
            port: self.settings.port.clone(),
            source: io::Error::new(io::ErrorKind::NotConnected, "link not open"),
        })
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let line: Vec<u8> = match self.pending.iter().position(|&b| b == b'\n') {
            Some(end) => {
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                line
            }
            None if self.pending.len() >= MAX_LINE_LENGTH => {
                let cut = utf8_boundary(&self.pending, MAX_LINE_LENGTH);
                self.pending.drain(..cut).collect()
            }
            None => return None,
        };
        // Boards mix "\r\n" and "\n\r"
        let start = line.iter().position(|&b| b != b'\r').unwrap_or(line.len());
        let end = line
            .iter()
            .rposition(|&b| b != b'\r')
            .map_or(start, |last| last + 1);
        Some(line[start..end].to_vec())
    }
}

/// Largest cut position not after `limit` that keeps a UTF-8 character whole.
///
/// `data` holds at least `limit` bytes. Without a lead byte in the last
/// character width the cut stays at `limit`.
fn utf8_boundary(data: &[u8], limit: usize) -> usize {
    for position in (limit.saturating_sub(3)..limit).rev() {
        let width = match data[position] {
            0x80..=0xBF => continue,
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            _ => 1,
        };
        return if position > 0 && position + width > limit {
            position
        } else {
            limit
        };
    }
    limit
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
