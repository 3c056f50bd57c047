//! Conversion between physical values and DAC codes.
//!
//! Each module type carries a static table of three output ranges plus the
//! per-range calibration corrections measured for the individual board. The
//! same engine serves the voltage and current boards; the current board adds
//! a fixed transresistance between the DAC voltage and the output current.

use crate::error::{Error, Result};

/// DAC full-scale code at native resolution (20 bit).
pub const DAC_FULL_SCALE: f64 = 1_048_576.0;

/// DAC full-scale code with dithering, 4 bits wider (24 bit).
pub const DAC_FULL_SCALE_DITH: f64 = 16_777_216.0;

/// One output range of a module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeSpec {
    /// Range id as printed on the panel, 1 (most sensitive) to 3.
    pub id: u8,
    pub min: f64,
    pub max: f64,
    /// Nominal gain of the output stage on this range.
    pub gain: f64,
}

/// Per-range calibration corrections, measured per board and supplied as
/// configuration. Immutable for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalConstants {
    pub gain_error: f64,
    pub offset_error: f64,
}

impl CalConstants {
    /// An uncalibrated board: unity gain, zero offset.
    pub const IDEAL: CalConstants = CalConstants {
        gain_error: 1.0,
        offset_error: 0.0,
    };
}

/// Constants of the AC frequency synthesis path (DDS on the voltage board).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencySpec {
    pub max_hz: f64,
    /// DDS sample rate.
    pub sampling_hz: f64,
    /// Phase accumulator full scale (2^32).
    pub accumulator_full_scale: f64,
    /// Measured correction for the actual synthesis clock.
    pub clock_correction: f64,
}

/// Static description of one analog-output module type plus its calibration.
///
/// This is the parameterization that lets one driver serve both board types:
/// the tables differ, the logic does not.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModuleProfile {
    pub ranges: [RangeSpec; 3],
    pub cal: [CalConstants; 3],
    /// DAC reference voltages.
    pub vref_pos: f64,
    pub vref_neg: f64,
    /// Transresistance of the current output stage; `None` on direct voltage
    /// outputs.
    pub rref: Option<f64>,
    /// AC synthesis constants; `None` on DC-only modules.
    pub frequency: Option<FrequencySpec>,
    /// Error reported when a value falls outside the calibrated span.
    pub range_error: Error,
}

impl ModuleProfile {
    /// Low-voltage board: three symmetric ranges up to ±22 V, bipolar ±10 V
    /// DAC references, DDS output up to 10 kHz.
    pub const fn low_voltage(cal: [CalConstants; 3]) -> Self {
        Self {
            ranges: [
                RangeSpec {
                    id: 1,
                    min: -0.22,
                    max: 0.22,
                    gain: 1.125 * 2.0 / 100.0,
                },
                RangeSpec {
                    id: 2,
                    min: -2.2,
                    max: 2.2,
                    gain: 1.125 * 2.0 / 10.0,
                },
                RangeSpec {
                    id: 3,
                    min: -22.0,
                    max: 22.0,
                    gain: 1.125 * 2.0,
                },
            ],
            cal,
            vref_pos: 10.0,
            vref_neg: -10.0,
            rref: None,
            frequency: Some(FrequencySpec {
                max_hz: 10_000.0,
                sampling_hz: 100_000.0,
                accumulator_full_scale: 4_294_967_296.0,
                clock_correction: 1.0,
            }),
            range_error: Error::VoltRange,
        }
    }

    /// Current board: three unipolar ranges up to 2.2 A, 0..5 V DAC
    /// references, fixed 2256.25 Ω transresistance.
    pub const fn current(cal: [CalConstants; 3]) -> Self {
        Self {
            ranges: [
                RangeSpec {
                    id: 1,
                    min: 0.0,
                    max: 0.022,
                    gain: 10.0,
                },
                RangeSpec {
                    id: 2,
                    min: 0.0,
                    max: 0.22,
                    gain: 100.0,
                },
                RangeSpec {
                    id: 3,
                    min: 0.0,
                    max: 2.2,
                    gain: 1_000.0,
                },
            ],
            cal,
            vref_pos: 5.0,
            vref_neg: 0.0,
            rref: Some(2_256.25),
            frequency: None,
            range_error: Error::CurrRange,
        }
    }

    /// Look up a range by panel id; ids outside 1..=3 do not exist.
    pub fn range(&self, id: u8) -> Result<&RangeSpec> {
        if (1..=3).contains(&id) {
            Ok(&self.ranges[(id - 1) as usize])
        } else {
            Err(Error::NonexistentRange)
        }
    }

    /// Reject values outside the selected range before any protocol traffic
    /// happens. Bounds are inclusive.
    pub fn check_range(&self, value: f64, range_id: u8) -> Result<()> {
        let range = self.range(range_id)?;
        if value < range.min || value > range.max {
            Err(self.range_error)
        } else {
            Ok(())
        }
    }

    /// Pick the most sensitive range whose interval contains `value`. Bounds
    /// are inclusive, matching [`Self::check_range`], so a full-scale value
    /// still selects the finer range.
    pub fn autorange(&self, value: f64) -> Result<u8> {
        self.ranges
            .iter()
            .find(|range| value >= range.min && value <= range.max)
            .map(|range| range.id)
            .ok_or(self.range_error)
    }

    /// DAC code for `value` on the given range.
    ///
    /// The per-range linear correction is applied first, then the result is
    /// scaled into the converter's reference span. With `dithering` the code
    /// is 24 bits wide and its low 4 bits select the duty pattern; without,
    /// it is the native 20-bit code.
    pub fn value_to_code(&self, value: f64, range_id: u8, dithering: bool) -> Result<u32> {
        let range = self.range(range_id)?;
        let cal = self.cal[(range_id - 1) as usize];
        let dac_input = match self.rref {
            Some(rref) => ((value - cal.offset_error) * rref) / (range.gain * cal.gain_error),
            None => (value - cal.offset_error) / (range.gain * cal.gain_error),
        };
        let full_scale = if dithering {
            DAC_FULL_SCALE_DITH
        } else {
            DAC_FULL_SCALE
        };
        let code = (dac_input - self.vref_neg) * (full_scale / (self.vref_pos - self.vref_neg));
        Ok(libm::round(code) as u32)
    }

    /// Physical value a given DAC code produces; algebraic inverse of
    /// [`Self::value_to_code`].
    pub fn code_to_value(&self, code: u32, range_id: u8, dithering: bool) -> Result<f64> {
        let range = self.range(range_id)?;
        let cal = self.cal[(range_id - 1) as usize];
        let full_scale = if dithering {
            DAC_FULL_SCALE_DITH
        } else {
            DAC_FULL_SCALE
        };
        let dac_input =
            code as f64 * (self.vref_pos - self.vref_neg) / full_scale + self.vref_neg;
        Ok(match self.rref {
            Some(rref) => dac_input * (range.gain * cal.gain_error) / rref + cal.offset_error,
            None => dac_input * (range.gain * cal.gain_error) + cal.offset_error,
        })
    }

    /// Size of one output quantization step on the given range, in physical
    /// units.
    pub fn quantization_step(&self, range_id: u8, dithering: bool) -> Result<f64> {
        let range = self.range(range_id)?;
        let cal = self.cal[(range_id - 1) as usize];
        let full_scale = if dithering {
            DAC_FULL_SCALE_DITH
        } else {
            DAC_FULL_SCALE
        };
        let step = (self.vref_pos - self.vref_neg) / full_scale;
        Ok(match self.rref {
            Some(rref) => step * range.gain * cal.gain_error / rref,
            None => step * range.gain * cal.gain_error,
        })
    }

    pub fn check_frequency(&self, freq: f64) -> Result<()> {
        let spec = self.frequency.as_ref().ok_or(Error::FreqRange)?;
        if freq < 0.0 || freq > spec.max_hz {
            Err(Error::FreqRange)
        } else {
            Ok(())
        }
    }

    /// Phase-accumulator step written to the tuning-word register; one step
    /// is added per DDS sample.
    pub fn frequency_to_tuning_word(&self, freq: f64) -> Result<u32> {
        self.check_frequency(freq)?;
        let spec = self.frequency.as_ref().ok_or(Error::FreqRange)?;
        let ftw =
            freq * spec.accumulator_full_scale / (spec.sampling_hz * spec.clock_correction);
        Ok(libm::round(ftw) as u32)
    }
}
