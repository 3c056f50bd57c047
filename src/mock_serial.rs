//! Mock serial transport used by the unit tests.
//!
//! Bytes written through `embedded-io` are captured for inspection; bytes to
//! be read are either injected directly or scripted as replies to the
//! query-all frame, which is how a real sub-board behaves: it stays silent
//! until the master polls it.

const QUERY_ALL_LINE: &[u8] = b"G003F";

pub struct MockSerial {
    /// Bytes currently readable.
    rx: heapless::Deque<u8, 512>,
    /// Scripted register dumps, released one per received query-all frame.
    replies: heapless::Deque<heapless::Vec<u8, 256>, 8>,
    /// Query-all frames to swallow before the first scripted reply.
    skip: u8,
    /// Everything written through the transport.
    written: heapless::Vec<u8, 1024>,
    /// Outgoing line currently being assembled, for query detection.
    line: heapless::Vec<u8, 64>,
    write_error: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum MockSerialError {
    /// Simulated transport fault.
    #[error("simulated transport fault")]
    SimulatedError,
    /// A buffer in the mock overflowed; the test is miswritten.
    #[error("a buffer in the mock overflowed")]
    BufferOverflow,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::SimulatedError => embedded_io::ErrorKind::Other,
            MockSerialError::BufferOverflow => embedded_io::ErrorKind::OutOfMemory,
        }
    }
}

impl embedded_io::ErrorType for MockSerial {
    type Error = MockSerialError;
}

impl embedded_io::Read for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut count = 0;
        while count < buf.len() {
            match self.rx.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for MockSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl embedded_io::Write for MockSerial {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        if self.write_error {
            return Err(MockSerialError::SimulatedError);
        }
        for &byte in buf {
            self.written
                .push(byte)
                .map_err(|_| MockSerialError::BufferOverflow)?;
            if byte == b'\n' || byte == b'\r' {
                if self.line.as_slice() == QUERY_ALL_LINE {
                    self.release_reply();
                }
                self.line.clear();
            } else {
                let _ = self.line.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.write_error {
            return Err(MockSerialError::SimulatedError);
        }
        Ok(())
    }
}

impl MockSerial {
    pub fn new() -> Self {
        Self {
            rx: heapless::Deque::new(),
            replies: heapless::Deque::new(),
            skip: 0,
            written: heapless::Vec::new(),
            line: heapless::Vec::new(),
            write_error: false,
        }
    }

    /// Make bytes immediately readable, as if the peer had already sent them.
    pub fn inject(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let _ = self.rx.push_back(byte);
        }
    }

    /// Script a register dump (terminators added per line) to be released
    /// when the next query-all frame is written.
    pub fn on_query_reply(&mut self, lines: &[&str]) {
        let mut batch = heapless::Vec::new();
        for line in lines {
            let _ = batch.extend_from_slice(line.as_bytes());
            let _ = batch.extend_from_slice(b"\n\r");
        }
        let _ = self.replies.push_back(batch);
    }

    /// Leave the next `count` query-all frames unanswered.
    pub fn skip_queries(&mut self, count: u8) {
        self.skip = count;
    }

    fn release_reply(&mut self) {
        if self.skip > 0 {
            self.skip -= 1;
            return;
        }
        if let Some(batch) = self.replies.pop_front() {
            for &byte in batch.iter() {
                let _ = self.rx.push_back(byte);
            }
        }
    }

    pub fn written_data(&self) -> &[u8] {
        &self.written
    }

    /// Drain and return everything written so far.
    pub fn take_written(&mut self) -> Vec<u8> {
        let data = self.written.to_vec();
        self.written.clear();
        data
    }

    pub fn set_write_error(&mut self, fail: bool) {
        self.write_error = fail;
    }
}

/// No-op delay for host-side tests; the mock transport is instantaneous.
pub struct InstantDelay;

impl embedded_hal::delay::DelayNs for InstantDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, ReadReady, Write};

    #[test]
    fn captures_written_bytes() {
        let mut mock = MockSerial::new();
        mock.write(b"H0001\n\r").unwrap();
        mock.write(b"I00000000\n\r").unwrap();
        assert_eq!(mock.written_data(), b"H0001\n\rI00000000\n\r");
        assert_eq!(mock.take_written(), b"H0001\n\rI00000000\n\r");
        assert!(mock.written_data().is_empty());
    }

    #[test]
    fn injected_bytes_are_readable() {
        let mut mock = MockSerial::new();
        assert!(!mock.read_ready().unwrap());
        mock.inject(b"@CCB\n");
        assert!(mock.read_ready().unwrap());

        let mut buf = [0u8; 3];
        assert_eq!(mock.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"@CC");
        let mut buf = [0u8; 8];
        assert_eq!(mock.read(&mut buf).unwrap(), 2);
        assert_eq!(mock.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn query_all_releases_exactly_one_reply() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["@CCB", "G003F"]);
        mock.on_query_reply(&["@CCB", "G0000"]);

        // a register write does not trigger a reply
        mock.write(b"H0001\n\r").unwrap();
        assert!(!mock.read_ready().unwrap());

        mock.write(b"G003F\n\r").unwrap();
        let mut buf = [0u8; 64];
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"@CCB\n\rG003F\n\r");

        mock.write(b"G003F\n\r").unwrap();
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"@CCB\n\rG0000\n\r");

        // script exhausted: silence
        mock.write(b"G003F\n\r").unwrap();
        assert!(!mock.read_ready().unwrap());
    }

    #[test]
    fn skipped_queries_stay_silent() {
        let mut mock = MockSerial::new();
        mock.skip_queries(1);
        mock.on_query_reply(&["@CCB"]);

        mock.write(b"G003F\n\r").unwrap();
        assert!(!mock.read_ready().unwrap());
        mock.write(b"G003F\n\r").unwrap();
        assert!(mock.read_ready().unwrap());
    }

    #[test]
    fn write_error_simulation() {
        let mut mock = MockSerial::new();
        mock.set_write_error(true);
        assert!(mock.write(b"x").is_err());
        assert!(mock.flush().is_err());
        mock.set_write_error(false);
        assert!(mock.write(b"x").is_ok());
    }
}
