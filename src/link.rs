//! Master side of the inter-board register protocol.
//!
//! A link owns the serial channel to one sub-board plus a shadow copy of the
//! board's registers. The shadow is only ever updated from a verified
//! read-back; until then the board's own copy is the authoritative one.

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use fugit::MillisDurationU32;

use crate::channel::{Line, LineChannel};
use crate::error::{Error, Result};
use crate::register::{self, Register, RegisterFile};

/// Identification tag of the low-voltage board.
pub const VOLTAGE_MODULE_TAG: &str = "@CLVB";

/// Identification tag of the current board.
pub const CURRENT_MODULE_TAG: &str = "@CCB";

/// How long to wait for the first response line of a query-all exchange.
pub const RESPONSE_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(100);

/// Settle time between sending a register write and verifying it.
const SETTLE_DELAY_MS: u32 = 10;

/// Identification attempts at boot/reconnect before the module is given up.
const CONNECT_ATTEMPTS: u8 = 3;

const CONNECT_RETRY_DELAY_MS: u32 = 1_000;

/// Serial link to one sub-board.
pub struct ModuleLink<S, D> {
    channel: LineChannel<S>,
    delay: D,
    tag: &'static str,
    shadow: RegisterFile,
}

impl<S: Read + Write + ReadReady, D: DelayNs> ModuleLink<S, D> {
    pub fn new(io: S, delay: D, tag: &'static str) -> Self {
        Self {
            channel: LineChannel::new(io),
            delay,
            tag,
            shadow: RegisterFile::default(),
        }
    }

    pub fn expected_tag(&self) -> &'static str {
        self.tag
    }

    /// Last verified register read-back.
    pub fn shadow(&self) -> &RegisterFile {
        &self.shadow
    }

    pub(crate) fn io_mut(&mut self) -> &mut S {
        self.channel.io_mut()
    }

    fn send_query_all(&mut self) -> Result<()> {
        let frame = register::encode_frame(Register::G, register::QUERY_ALL);
        self.channel.send(frame.as_bytes())
    }

    /// One identity handshake round: query the board and return its tag line.
    ///
    /// A timeout or a first line that is not a tag is a communication
    /// failure. This function does not retry; boot-time retries belong to
    /// [`Self::connect`].
    pub fn identify(&mut self) -> Result<Line> {
        self.channel.clear_rx();
        self.send_query_all()?;
        let line = self
            .channel
            .read_line(RESPONSE_TIMEOUT, &mut self.delay)
            .ok_or(Error::Communication)?;
        if line.first() != Some(&b'@') {
            #[cfg(feature = "defmt")]
            defmt::warn!("identify: response does not start with a tag");
            return Err(Error::Communication);
        }
        // let the register dump that follows the tag drain, then drop it
        self.delay.delay_ms(RESPONSE_TIMEOUT.to_millis());
        self.channel.clear_rx();
        Ok(line)
    }

    /// Boot/reconnect handshake: identify the board, retrying communication
    /// failures up to 3 times with 1 s between attempts. A readable tag that
    /// belongs to a different board type fails immediately as
    /// [`Error::WrongModule`].
    pub fn connect(&mut self) -> Result<()> {
        let mut last = Error::Communication;
        for attempt in 0..CONNECT_ATTEMPTS {
            if attempt > 0 {
                self.delay.delay_ms(CONNECT_RETRY_DELAY_MS);
            }
            match self.identify() {
                Ok(tag) => {
                    return if tag.as_slice() == self.tag.as_bytes() {
                        Ok(())
                    } else {
                        Err(Error::WrongModule)
                    };
                }
                Err(error) => last = error,
            }
        }
        Err(last)
    }

    /// Write one register and verify it by reading the whole file back.
    ///
    /// A single round trip, pass or fail: a mismatch or an unreadable
    /// read-back returns [`Error::Communication`] and leaves the shadow
    /// untouched.
    pub fn write_register(&mut self, reg: Register, value: u32) -> Result<()> {
        let frame = register::encode_frame(reg, value);
        self.channel.send(frame.as_bytes())?;
        self.delay.delay_ms(SETTLE_DELAY_MS);

        let readback = self.read_all_registers()?;
        let sent = match reg.width_bits() {
            16 => value & 0xFFFF,
            _ => value,
        };
        if readback.get(reg) != sent {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "write verify failed: {} sent {=u32:x} read {=u32:x}",
                reg,
                sent,
                readback.get(reg)
            );
            return Err(Error::Communication);
        }
        self.shadow = readback;
        Ok(())
    }

    /// Query-all exchange: returns the register values the board reported.
    ///
    /// Lines whose leading letter is not a known register are ignored, not an
    /// error; the response must however start with the board's tag line.
    pub fn read_all_registers(&mut self) -> Result<RegisterFile> {
        self.channel.clear_rx();
        self.send_query_all()?;
        let first = self
            .channel
            .read_line(RESPONSE_TIMEOUT, &mut self.delay)
            .ok_or(Error::Communication)?;
        if first.first() != Some(&b'@') {
            return Err(Error::Communication);
        }
        let mut file = RegisterFile::default();
        // drain until the buffer goes quiet; one poll interval between lines
        // gives the UART time to deliver the rest of the dump
        loop {
            match self.channel.try_read_line() {
                Some(line) => {
                    if let Some((reg, value)) = register::parse_frame(&line) {
                        file.set(reg, value);
                    }
                    self.delay.delay_ms(SETTLE_DELAY_MS);
                }
                None => break,
            }
        }
        self.channel.clear_rx();
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_serial::{InstantDelay, MockSerial};

    fn link_with(mock: MockSerial) -> ModuleLink<MockSerial, InstantDelay> {
        ModuleLink::new(mock, InstantDelay, VOLTAGE_MODULE_TAG)
    }

    #[test]
    fn identify_returns_the_tag_line() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["@CLVB", "G0000", "H0000", "I00000000", "J00000000"]);
        let mut link = link_with(mock);

        let tag = link.identify().unwrap();
        assert_eq!(tag.as_slice(), b"@CLVB");
        assert_eq!(link.io_mut().written_data(), b"G003F\n\r");
    }

    #[test]
    fn identify_times_out_as_communication_error() {
        let mut link = link_with(MockSerial::new());
        assert_eq!(link.identify(), Err(Error::Communication));
    }

    #[test]
    fn identify_rejects_garbage_leader() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["G0000", "H0000"]);
        let mut link = link_with(mock);
        assert_eq!(link.identify(), Err(Error::Communication));
    }

    #[test]
    fn connect_flags_a_foreign_tag_without_retrying() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["@CCB", "G0000", "H0000", "I00000000"]);
        let mut link = link_with(mock);
        assert_eq!(link.connect(), Err(Error::WrongModule));
        // a single query went out; the wrong tag is not a retryable fault
        assert_eq!(link.io_mut().written_data(), b"G003F\n\r");
    }

    #[test]
    fn connect_retries_communication_failures_three_times() {
        let mut link = link_with(MockSerial::new());
        assert_eq!(link.connect(), Err(Error::Communication));
        assert_eq!(link.io_mut().written_data(), b"G003F\n\rG003F\n\rG003F\n\r");
    }

    #[test]
    fn connect_succeeds_on_a_late_response() {
        let mut mock = MockSerial::new();
        mock.skip_queries(2);
        mock.on_query_reply(&["@CLVB", "G0000", "H0000", "I00000000", "J00000000"]);
        let mut link = link_with(mock);
        assert_eq!(link.connect(), Ok(()));
    }

    #[test]
    fn read_all_demuxes_by_register_letter() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["@CLVB", "G003F", "H0016", "I00123450", "J0000ABCD"]);
        let mut link = link_with(mock);

        let file = link.read_all_registers().unwrap();
        assert_eq!(file.get(Register::G), 0x003F);
        assert_eq!(file.get(Register::H), 0x0016);
        assert_eq!(file.get(Register::I), 0x0012_3450);
        assert_eq!(file.get(Register::J), 0x0000_ABCD);
    }

    #[test]
    fn read_all_ignores_unknown_lines() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["@CLVB", "H0001", "X1234", "??", "I00000020"]);
        let mut link = link_with(mock);

        let file = link.read_all_registers().unwrap();
        assert_eq!(file.get(Register::H), 0x0001);
        assert_eq!(file.get(Register::I), 0x0020);
        assert_eq!(file.get(Register::G), 0);
    }

    #[test]
    fn write_register_verifies_the_read_back() {
        let mut mock = MockSerial::new();
        mock.on_query_reply(&["@CLVB", "G0000", "H0005", "I00000000", "J00000000"]);
        let mut link = link_with(mock);

        assert_eq!(link.write_register(Register::H, 0x0005), Ok(()));
        assert_eq!(link.shadow().get(Register::H), 0x0005);
        let written = core::str::from_utf8(link.io_mut().written_data()).unwrap();
        assert_eq!(written, "H0005\n\rG003F\n\r");
    }

    #[test]
    fn write_register_mismatch_is_a_communication_error() {
        let mut mock = MockSerial::new();
        // board echoes a different value than we sent
        mock.on_query_reply(&["@CLVB", "G0000", "H0004", "I00000000", "J00000000"]);
        let mut link = link_with(mock);

        assert_eq!(
            link.write_register(Register::H, 0x0005),
            Err(Error::Communication)
        );
        // the shadow still holds the pre-write state
        assert_eq!(link.shadow().get(Register::H), 0);
    }

    #[test]
    fn write_register_without_read_back_fails() {
        let mut link = link_with(MockSerial::new());
        assert_eq!(
            link.write_register(Register::I, 0x0080_0000),
            Err(Error::Communication)
        );
    }
}
