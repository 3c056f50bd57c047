//! Line-oriented channel over a byte transport.
//!
//! Every link in the system (sub-board UARTs, the USB and Ethernet user
//! ports) carries `\n\r`-terminated ASCII lines; either terminator alone is
//! accepted on receive. The transport is anything implementing the
//! `embedded-io` traits, so the same code runs against a UART driver, a host
//! serial port or an in-memory pipe.

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use fugit::MillisDurationU32;

use crate::error::{Error, Result};

/// Longest line either side may send (command lines included).
pub const LINE_CAPACITY: usize = 48;

/// One received line, terminator stripped. May be empty when the peer
/// terminates with a `\n\r` pair.
pub type Line = heapless::Vec<u8, LINE_CAPACITY>;

/// Granularity of the blocking-read poll loop.
const POLL_INTERVAL_MS: u32 = 10;

/// Byte transport wrapped with RX buffering and line assembly.
pub struct LineChannel<S> {
    io: S,
    rx: heapless::Deque<u8, 256>,
}

impl<S: Read + Write + ReadReady> LineChannel<S> {
    pub fn new(io: S) -> Self {
        Self {
            io,
            rx: heapless::Deque::new(),
        }
    }

    pub fn io_mut(&mut self) -> &mut S {
        &mut self.io
    }

    /// Transmit raw bytes. Transport failures surface as the protocol-level
    /// communication error.
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_all(bytes).map_err(|_| Error::Communication)
    }

    /// Move everything the transport has received so far into the RX buffer.
    /// On overflow the oldest bytes are dropped; the protocol recovers at the
    /// next query-all exchange.
    fn pump(&mut self) {
        let mut chunk = [0u8; 32];
        while let Ok(true) = self.io.read_ready() {
            let Ok(n) = self.io.read(&mut chunk) else {
                return;
            };
            if n == 0 {
                return;
            }
            for &byte in &chunk[..n] {
                if self.rx.push_back(byte).is_err() {
                    self.rx.pop_front();
                    let _ = self.rx.push_back(byte);
                }
            }
        }
    }

    /// Number of bytes waiting to be read.
    pub fn available(&mut self) -> usize {
        self.pump();
        self.rx.len()
    }

    /// Drop everything received so far.
    pub fn clear_rx(&mut self) {
        self.pump();
        self.rx.clear();
    }

    /// Take one complete line out of the RX buffer, or `None` when no
    /// terminator has arrived yet. Bytes of a partial line stay buffered.
    pub fn try_read_line(&mut self) -> Option<Line> {
        self.pump();
        let terminator = self
            .rx
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')?;
        let mut line = Line::new();
        for _ in 0..terminator {
            if let Some(byte) = self.rx.pop_front() {
                let _ = line.push(byte);
            }
        }
        self.rx.pop_front();
        Some(line)
    }

    /// Read one line, waiting up to `timeout` for its terminator. The wait
    /// polls the transport every [`POLL_INTERVAL_MS`]; it never blocks past
    /// the timeout, so round-robin servicing of other channels keeps going.
    pub fn read_line(
        &mut self,
        timeout: MillisDurationU32,
        delay: &mut impl DelayNs,
    ) -> Option<Line> {
        let mut waited = 0;
        loop {
            if let Some(line) = self.try_read_line() {
                return Some(line);
            }
            if waited >= timeout.to_millis() {
                return None;
            }
            delay.delay_ms(POLL_INTERVAL_MS);
            waited += POLL_INTERVAL_MS;
        }
    }
}
