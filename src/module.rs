//! Master-side driver for one analog-output sub-board.
//!
//! The voltage and current boards share this driver; everything that differs
//! between them lives in the injected [`ModuleProfile`] and [`ControlLayout`]
//! tables. State is committed only after the register write behind it has
//! been verified, so a failed protocol round trip never leaves the driver
//! believing something the board does not.

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};

use crate::calibration::{CalConstants, ModuleProfile};
use crate::error::{Error, Result};
use crate::link::{CURRENT_MODULE_TAG, ModuleLink, VOLTAGE_MODULE_TAG};
use crate::register::{CURRENT_CONTROL, ControlLayout, Register, VOLTAGE_CONTROL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    #[default]
    Dc,
    Ac,
}

/// Desired output state of one module, as last confirmed over the protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModuleState {
    /// Output value in volts or amps.
    pub value: f64,
    /// AC frequency in hertz (voltage module only).
    pub frequency: f64,
    pub range: u8,
    pub mode: Mode,
    pub output_on: bool,
    pub autorange_on: bool,
    pub dithering_on: bool,
}

impl ModuleState {
    fn new(range: u8) -> Self {
        Self {
            value: 0.0,
            frequency: 0.0,
            range,
            mode: Mode::Dc,
            output_on: false,
            autorange_on: false,
            dithering_on: false,
        }
    }
}

/// Driver for one analog-output module.
pub struct AnalogOutputModule<S, D> {
    link: ModuleLink<S, D>,
    profile: ModuleProfile,
    layout: &'static ControlLayout,
    /// Working copy of the control register; committed on verified writes.
    control: u16,
    state: ModuleState,
    default_range: u8,
    fault: Option<Error>,
}

impl<S: Read + Write + ReadReady, D: DelayNs> AnalogOutputModule<S, D> {
    pub fn new(
        link: ModuleLink<S, D>,
        profile: ModuleProfile,
        layout: &'static ControlLayout,
        default_range: u8,
    ) -> Self {
        Self {
            link,
            profile,
            layout,
            control: 0,
            state: ModuleState::new(default_range),
            default_range,
            fault: None,
        }
    }

    /// Driver for the low-voltage board on the given serial transport.
    pub fn low_voltage(io: S, delay: D, cal: [CalConstants; 3]) -> Self {
        Self::new(
            ModuleLink::new(io, delay, VOLTAGE_MODULE_TAG),
            ModuleProfile::low_voltage(cal),
            &VOLTAGE_CONTROL,
            3,
        )
    }

    /// Driver for the current board on the given serial transport.
    pub fn current(io: S, delay: D, cal: [CalConstants; 3]) -> Self {
        Self::new(
            ModuleLink::new(io, delay, CURRENT_MODULE_TAG),
            ModuleProfile::current(cal),
            &CURRENT_CONTROL,
            1,
        )
    }

    pub fn state(&self) -> &ModuleState {
        &self.state
    }

    pub fn profile(&self) -> &ModuleProfile {
        &self.profile
    }

    /// Bring-up failure recorded by [`Self::connect`]; a faulted module stays
    /// unselectable until restart.
    pub fn fault(&self) -> Option<Error> {
        self.fault
    }

    pub(crate) fn link_mut(&mut self) -> &mut ModuleLink<S, D> {
        &mut self.link
    }

    /// Bring the board up: identity handshake (retried by the link), default
    /// range, zero output.
    pub fn connect(&mut self) -> Result<()> {
        let result = self.try_connect();
        self.fault = result.err();
        result
    }

    fn try_connect(&mut self) -> Result<()> {
        self.link.connect()?;
        self.state = ModuleState::new(self.default_range);
        self.control = 0;
        self.set_range(self.default_range)?;
        self.set_dc(0.0)?;
        Ok(())
    }

    fn write_control(&mut self, next: u16) -> Result<()> {
        self.link.write_register(Register::H, next as u32)?;
        self.control = next;
        Ok(())
    }

    /// Select an output range by switching the range relays. Ids outside
    /// 1..=3 are rejected before any traffic.
    pub fn set_range(&mut self, range: u8) -> Result<()> {
        self.profile.range(range)?;
        let next = (self.control & !self.layout.range_mask)
            | self.layout.range_select[(range - 1) as usize];
        self.write_control(next)?;
        self.state.range = range;
        Ok(())
    }

    /// Connect or disconnect the output binding posts.
    pub fn set_output(&mut self, on: bool) -> Result<()> {
        let bit = 1 << self.layout.output_bit;
        let next = if on {
            self.control | bit
        } else {
            self.control & !bit
        };
        self.write_control(next)?;
        self.state.output_on = on;
        Ok(())
    }

    /// Enable or disable sub-LSB dithering on the board.
    pub fn set_dithering(&mut self, on: bool) -> Result<()> {
        let bit = 1 << self.layout.dither_bit;
        let next = if on {
            self.control | bit
        } else {
            self.control & !bit
        };
        self.write_control(next)?;
        self.state.dithering_on = on;
        Ok(())
    }

    /// Autoranging is a pure driver-side policy; nothing is written until the
    /// next value command.
    pub fn set_autorange(&mut self, on: bool) {
        self.state.autorange_on = on;
    }

    fn apply_range_policy(&mut self, value: f64) -> Result<()> {
        if self.state.autorange_on {
            let range = self.profile.autorange(value)?;
            self.set_range(range)
        } else {
            self.profile.check_range(value, self.state.range)
        }
    }

    /// 24-bit code register content for `value`: with dithering the low
    /// 4 bits carry the duty selector, without they are zero.
    fn code_register_value(&self, value: f64, dithering: bool) -> Result<u32> {
        if dithering {
            self.profile.value_to_code(value, self.state.range, true)
        } else {
            Ok(self.profile.value_to_code(value, self.state.range, false)? << 4)
        }
    }

    /// Set a DC output value. Checks (or auto-selects) the range first, drops
    /// the board out of AC mode, then writes the DAC code.
    pub fn set_dc(&mut self, value: f64) -> Result<()> {
        self.apply_range_policy(value)?;

        if let Some(ac_bit) = self.layout.ac_bit {
            let next = self.control & !(1 << ac_bit);
            self.write_control(next)?;
        }
        self.state.mode = Mode::Dc;

        let code = self.code_register_value(value, self.state.dithering_on)?;
        self.link.write_register(Register::I, code)?;
        self.state.value = value;
        Ok(())
    }

    /// Set an AC amplitude and frequency (voltage board only). The amplitude
    /// code always uses the non-dithered full scale.
    pub fn set_ac(&mut self, value: f64, frequency: f64) -> Result<()> {
        let ac_bit = self.layout.ac_bit.ok_or(Error::UnknownCommand)?;
        self.apply_range_policy(value)?;

        self.set_frequency(frequency)?;

        let next = self.control | 1 << ac_bit;
        self.write_control(next)?;
        self.state.mode = Mode::Ac;

        let code = self.code_register_value(value, false)?;
        self.link.write_register(Register::I, code)?;
        self.state.value = value;
        Ok(())
    }

    /// Write the frequency tuning word for the AC path.
    pub fn set_frequency(&mut self, frequency: f64) -> Result<()> {
        let ftw = self.profile.frequency_to_tuning_word(frequency)?;
        self.link.write_register(Register::J, ftw)?;
        self.state.frequency = frequency;
        Ok(())
    }

    /// Park the module: zero output, output relay open.
    pub fn shutdown(&mut self) -> Result<()> {
        self.set_dc(0.0)?;
        self.set_output(false)
    }
}
