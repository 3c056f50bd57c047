//! Sub-LSB dithering engine.
//!
//! The board extends its 20-bit DAC by four bits of effective resolution:
//! a 1 kHz timer tick alternates the converter between two adjacent codes so
//! that the time-averaged output lands between them. The 4 low bits of the
//! 24-bit code register select one of 16 duty patterns; pattern `n` drives the
//! high code on `n` of every 16 ticks.

use core::cell::Cell;

use critical_section::Mutex;

use crate::bsp::dac::Dac;

/// Tick rate of the dither timer.
pub const TICK_RATE_HZ: u32 = 1_000;

/// Largest 20-bit DAC code.
pub const CODE_MAX: u32 = 0x000F_FFFF;

/// Duty patterns indexed by the sub-LSB selector. Bit `phase` of entry `n`
/// picks the high code on that tick. The bit ordering within each entry is
/// part of the hardware qualification (it spreads the high ticks for minimum
/// output ripple) and must be kept bit-for-bit.
pub const DUTY_PATTERNS: [u16; 16] = [
    0b0000000000000000,
    0b1000000000000000,
    0b1000000010000000,
    0b1000010000100000,
    0b1000100010001000,
    0b1001001001001000,
    0b1010010010010010,
    0b1010010101001010,
    0b1010101010101010,
    0b1110101010101010,
    0b1101101101101010,
    0b1101101101101110,
    0b1110111011101110,
    0b1111101111011110,
    0b1111111011111110,
    0b1111111111111110,
];

/// Everything one dither tick needs, precomputed by the control loop.
///
/// The tick handler only ever reads a whole snapshot; it never derives any of
/// these fields itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DitherState {
    /// Base 20-bit code.
    pub code_low: u32,
    /// `code_low + 1`, saturated at [`CODE_MAX`].
    pub code_high: u32,
    /// Duty pattern selected by the sub-LSB bits.
    pub pattern: u16,
    /// Current position in the 16-tick cycle.
    pub phase: u8,
}

impl DitherState {
    /// Derive the tick state from a 24-bit code register value: the high
    /// 20 bits are the base code, the low 4 bits select the duty pattern.
    pub fn from_code(code: u32) -> Self {
        let code_low = (code >> 4) & CODE_MAX;
        let code_high = if code_low == CODE_MAX {
            code_low
        } else {
            code_low + 1
        };
        Self {
            code_low,
            code_high,
            pattern: DUTY_PATTERNS[(code & 0xF) as usize],
            phase: 0,
        }
    }

    pub const fn idle() -> Self {
        Self {
            code_low: 0,
            code_high: 1,
            pattern: 0,
            phase: 0,
        }
    }

    fn select(&self) -> u32 {
        if (self.pattern >> self.phase) & 1 == 1 {
            self.code_high
        } else {
            self.code_low
        }
    }

    fn advance(&mut self) {
        self.phase = (self.phase + 1) % 16;
    }
}

/// Published snapshot shared between the control loop and the tick handler.
///
/// The loop replaces the whole snapshot inside a critical section, so the
/// handler can never observe a new pattern with an old code or vice versa.
pub struct DitherCell {
    state: Mutex<Cell<DitherState>>,
}

impl DitherCell {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(DitherState::idle())),
        }
    }

    /// Atomically replace the snapshot. Restarts the cycle at phase 0.
    pub fn publish(&self, state: DitherState) {
        critical_section::with(|cs| self.state.borrow(cs).set(state));
    }

    pub fn get(&self) -> DitherState {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    /// One dither tick: select this phase's code, latch it into the DAC and
    /// advance the phase. O(1) and free of recomputation; safe to call from
    /// interrupt context.
    pub fn tick(&self, dac: &mut impl Dac) {
        let code = critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            let code = state.select();
            state.advance();
            cell.set(state);
            code
        });
        dac.set_code(code);
    }
}

impl Default for DitherCell {
    fn default() -> Self {
        Self::new()
    }
}
