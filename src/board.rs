//! Runtime of an analog-output sub-board.
//!
//! The board MCU owns the authoritative register file. Its control loop
//! drains received frames into the registers, then services the resulting
//! events one loop iteration at a time: answering the query-all command,
//! switching relays, gating the dithering engine and latching DAC codes.
//! Nothing here runs in interrupt context; the tick interrupt only ever calls
//! [`DitherCell::tick`] on the published snapshot.

use embedded_io::{Read, ReadReady, Write};

use crate::bsp::dac::Dac;
use crate::bsp::relay::RelayBank;
use crate::bsp::tick::Ticker;
use crate::channel::LineChannel;
use crate::dither::{CODE_MAX, DitherCell, DitherState};
use crate::link::{CURRENT_MODULE_TAG, VOLTAGE_MODULE_TAG};
use crate::register::{
    self, CURRENT_CONTROL, ControlLayout, Register, RegisterFile, VOLTAGE_CONTROL,
};

/// Control loop of one sub-board.
pub struct OutputBoard<'a, S, A, R, T> {
    channel: LineChannel<S>,
    dac: A,
    relays: R,
    ticker: T,
    dither: &'a DitherCell,
    tag: &'static str,
    layout: &'static ControlLayout,
    /// Registers this board type implements and reports.
    registers_present: &'static [Register],
    registers: RegisterFile,
    /// One bit per register with an unconsumed change event.
    pending: u8,
    relays_state: u16,
    dithering_on: bool,
}

impl<'a, S, A, R, T> OutputBoard<'a, S, A, R, T>
where
    S: Read + Write + ReadReady,
    A: Dac,
    R: RelayBank,
    T: Ticker,
{
    /// Low-voltage board: registers G, H, I plus the tuning word J.
    pub fn voltage(io: S, dac: A, relays: R, ticker: T, dither: &'a DitherCell) -> Self {
        Self::new(
            io,
            dac,
            relays,
            ticker,
            dither,
            VOLTAGE_MODULE_TAG,
            &VOLTAGE_CONTROL,
            &[Register::G, Register::H, Register::I, Register::J],
        )
    }

    /// Current board: registers G, H, I.
    pub fn current(io: S, dac: A, relays: R, ticker: T, dither: &'a DitherCell) -> Self {
        Self::new(
            io,
            dac,
            relays,
            ticker,
            dither,
            CURRENT_MODULE_TAG,
            &CURRENT_CONTROL,
            &[Register::G, Register::H, Register::I],
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        io: S,
        dac: A,
        relays: R,
        ticker: T,
        dither: &'a DitherCell,
        tag: &'static str,
        layout: &'static ControlLayout,
        registers_present: &'static [Register],
    ) -> Self {
        Self {
            channel: LineChannel::new(io),
            dac,
            relays,
            ticker,
            dither,
            tag,
            layout,
            registers_present,
            registers: RegisterFile::default(),
            pending: 0,
            relays_state: 0,
            dithering_on: false,
        }
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.registers
    }

    pub fn dithering_on(&self) -> bool {
        self.dithering_on
    }

    pub(crate) fn io_mut(&mut self) -> &mut S {
        self.channel.io_mut()
    }

    /// One control-loop iteration: drain received frames, then service the
    /// register events they raised.
    pub fn run_once(&mut self) {
        while let Some(line) = self.channel.try_read_line() {
            if let Some((reg, value)) = register::parse_frame(&line) {
                if self.registers_present.contains(&reg) {
                    self.registers.set(reg, value);
                    self.pending |= 1 << reg as u8;
                }
            }
        }

        if self.take_pending(Register::G) && self.registers.get(Register::G) == register::QUERY_ALL
        {
            self.send_all_registers();
        }
        if self.take_pending(Register::H) {
            self.apply_control();
        }
        if self.take_pending(Register::I) {
            self.apply_code();
        }
        // J feeds the DDS fabric directly; storing it is all the MCU does
        self.pending = 0;
    }

    /// Dither tick entry point for the platform's timer interrupt.
    pub fn tick(&mut self) {
        self.dither.tick(&mut self.dac);
    }

    fn take_pending(&mut self, reg: Register) -> bool {
        let bit = 1 << reg as u8;
        let set = self.pending & bit != 0;
        self.pending &= !bit;
        set
    }

    /// Identification response: tag line followed by every register.
    fn send_all_registers(&mut self) {
        let _ = self.channel.send(self.tag.as_bytes());
        let _ = self.channel.send(b"\n\r");
        for &reg in self.registers_present {
            let frame = register::encode_frame(reg, self.registers.get(reg));
            let _ = self.channel.send(frame.as_bytes());
        }
    }

    /// Control-register event: switch relays that changed, then follow the
    /// dithering bit.
    fn apply_control(&mut self) {
        let control = self.registers.get(Register::H) as u16;

        let target = control & self.layout.relay_mask;
        for bit in 0..u16::BITS as u8 {
            if self.layout.relay_mask >> bit & 1 == 0 {
                continue;
            }
            let want = target >> bit & 1;
            let have = self.relays_state >> bit & 1;
            if want != have {
                if want == 1 {
                    self.relays.set(bit + 1);
                } else {
                    self.relays.reset(bit + 1);
                }
            }
        }
        self.relays_state = target;

        let dither_requested = control >> self.layout.dither_bit & 1 == 1;
        if dither_requested {
            // recompute before the first tick can fire
            self.publish_dither();
            self.ticker.enable();
        } else {
            self.ticker.disable();
            if self.dithering_on {
                // deterministic settle: park the converter on the base code
                self.dac.set_code(self.dither.get().code_low);
            }
        }
        self.dithering_on = dither_requested;
    }

    /// Code-register event: either latch the code directly or hand it to the
    /// dithering engine.
    fn apply_code(&mut self) {
        let raw = self.registers.get(Register::I);
        if self.dithering_on {
            self.publish_dither();
        } else {
            self.dac.set_code((raw >> 4) & CODE_MAX);
        }
    }

    fn publish_dither(&mut self) {
        self.dither
            .publish(DitherState::from_code(self.registers.get(Register::I)));
    }
}
