// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, warn};
use crate::config::PortSettings;

// ============================================================================
// Transport Trait
// ============================================================================

/// Duplex byte channel the XMODEM state machines talk through
pub trait Transport: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Reads up to `buf.len()` bytes. Returns a short count, zero, or a
    /// `TimedOut` error when `timeout` elapses first.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Reads one byte; `None` means nothing arrived in time.
    fn read_byte(&mut self, timeout: Duration) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read_timeout(&mut buf, timeout) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Keeps reading until `buf` is full or a read comes back empty.
    /// Returns how many bytes were filled.
    fn read_full(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.read_timeout(&mut buf[filled..], timeout) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Discards incoming bytes until the line stays quiet for `timeout`, so
    /// the tail of a rejected frame is not mistaken for a leading byte.
    /// Gives up after `PURGE_LIMIT` bytes on a line that never goes quiet.
    fn purge(&mut self, timeout: Duration) -> io::Result<usize> {
        let mut scratch = [0u8; 64];
        let mut discarded = 0;
        while discarded < PURGE_LIMIT {
            match self.read_timeout(&mut scratch, timeout) {
                Ok(0) => break,
                Ok(n) => discarded += n,
                Err(e) if is_timeout(&e) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(discarded)
    }
}

const PURGE_LIMIT: usize = 8 * 1024;

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock)
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Serial device opened through the serialport crate. The device is released
/// when this is dropped.
pub struct RealSerialPort {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl RealSerialPort {
    pub fn open(settings: &PortSettings) -> Result<Self, serialport::Error> {
        let timeout = Duration::from_millis(100);
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(settings.flow_control)
            .timeout(timeout)
            .open()?;

        // Stale bytes from an earlier session would be taken as protocol replies
        port.clear(ClearBuffer::All)?;

        Ok(RealSerialPort { port, timeout })
    }
}

impl Transport for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout).map_err(io::Error::other)?;
            self.timeout = timeout;
        }
        self.port.read(buf)
    }
}

impl Drop for RealSerialPort {
    fn drop(&mut self) {
        let name = self.port.name().unwrap_or_else(|| "serial port".to_string());
        if let Err(e) = self.port.clear(ClearBuffer::All) {
            warn!("Failed to clear {} buffers: {}", name, e);
        }
        debug!("Closed {}", name);
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    // Writes allowed to succeed before the link goes dead
    writes_before_failure: Option<usize>,
    failed_writes: usize,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            writes_before_failure: None,
            failed_writes: 0,
        }
    }

    /// Lets `count` writes through, then fails every later one with a broken
    /// pipe. Exactly one failing write is expected: a transport fault ends
    /// the transfer on the spot.
    pub fn fail_writes_after(mut self, count: usize) -> Self {
        self.writes_before_failure = Some(count);
        self
    }
}

#[cfg(test)]
impl Transport for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Some(remaining) = self.writes_before_failure.as_mut() {
            if *remaining == 0 {
                self.failed_writes += 1;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
            }
            *remaining -= 1;
        }
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(io::Error::new(io::ErrorKind::TimedOut, "Mock timeout"));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );

        if self.writes_before_failure.is_some() {
            assert_eq!(
                self.failed_writes, 1,
                "MockSerialPort expected exactly one failed write, got {}",
                self.failed_writes
            );
        }
    }
}

// ============================================================================
// In-memory Links for End-to-end Tests
// ============================================================================

/// One end of a lossless in-memory link
#[cfg(test)]
pub struct LoopbackPort {
    tx: std::sync::mpsc::Sender<u8>,
    rx: std::sync::mpsc::Receiver<u8>,
}

#[cfg(test)]
impl LoopbackPort {
    pub fn pair() -> (LoopbackPort, LoopbackPort) {
        let (a_tx, b_rx) = std::sync::mpsc::channel();
        let (b_tx, a_rx) = std::sync::mpsc::channel();
        (
            LoopbackPort { tx: a_tx, rx: a_rx },
            LoopbackPort { tx: b_tx, rx: b_rx },
        )
    }
}

#[cfg(test)]
impl Transport for LoopbackPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        for &byte in buf {
            self.tx
                .send(byte)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "Peer hung up"))?;
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        use std::sync::mpsc::{RecvTimeoutError, TryRecvError};

        if buf.is_empty() {
            return Ok(0);
        }

        match self.rx.recv_timeout(timeout) {
            Ok(byte) => buf[0] = byte,
            Err(RecvTimeoutError::Timeout) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "Loopback timeout"));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "Peer hung up"));
            }
        }

        let mut bytes_read = 1;
        while bytes_read < buf.len() {
            match self.rx.try_recv() {
                Ok(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(bytes_read)
    }
}

/// Discards every `nth` single-byte reply that reaches the wrapped port and
/// reports a timeout in its place.
#[cfg(test)]
pub struct LossyPort<T: Transport> {
    inner: T,
    nth: usize,
    delivered: usize,
}

#[cfg(test)]
impl<T: Transport> LossyPort<T> {
    pub fn new(inner: T, nth: usize) -> Self {
        LossyPort { inner, nth, delivered: 0 }
    }
}

#[cfg(test)]
impl<T: Transport> Transport for LossyPort<T> {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        let n = self.inner.read_timeout(buf, timeout)?;
        if n == 1 && buf.len() == 1 {
            self.delivered += 1;
            if self.delivered % self.nth == 0 {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "Dropped reply"));
            }
        }
        Ok(n)
    }
}
