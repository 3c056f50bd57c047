//! Register map of the analog-output sub-boards and the ASCII frame codec.
//!
//! One wire frame carries one register: `<Letter><HexDigits>` terminated by
//! `\n\r`. The hex field is zero-padded uppercase and its length is fixed by
//! the register width (4 digits for 16-bit registers, 8 for 32-bit).

use core::fmt::Write as _;

use strum::EnumCount;
use strum_macros::{EnumCount as EnumCountMacro, EnumIter};

/// Writing this value to [`Register::G`] asks the board to send its tag line
/// followed by the content of every register.
pub const QUERY_ALL: u32 = 0x003F;

/// Named registers of a sub-board. The letter alphabet starts at `'G'`; the
/// mapping is bijective and no code does character arithmetic on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, EnumCountMacro, EnumIter)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    /// Command register; only [`QUERY_ALL`] is meaningful.
    G,
    /// Control register: relay-select bits, output bit, dithering bit and, on
    /// the voltage board, the AC-mode bit. See [`ControlLayout`].
    H,
    /// DAC code register: high 20 bits are the converter code, low 4 bits the
    /// dither duty-pattern selector.
    I,
    /// Frequency tuning word of the AC voltage path.
    J,
    K,
    L,
}

impl Register {
    pub const fn letter(self) -> u8 {
        match self {
            Register::G => b'G',
            Register::H => b'H',
            Register::I => b'I',
            Register::J => b'J',
            Register::K => b'K',
            Register::L => b'L',
        }
    }

    pub const fn from_letter(letter: u8) -> Option<Register> {
        match letter {
            b'G' => Some(Register::G),
            b'H' => Some(Register::H),
            b'I' => Some(Register::I),
            b'J' => Some(Register::J),
            b'K' => Some(Register::K),
            b'L' => Some(Register::L),
            _ => None,
        }
    }

    /// Register width in bits; G and H are 16 bit, the rest 32 bit.
    pub const fn width_bits(self) -> u8 {
        match self {
            Register::G | Register::H => 16,
            _ => 32,
        }
    }

    pub const fn hex_digits(self) -> usize {
        self.width_bits() as usize / 4
    }
}

/// One complete wire frame, terminator included.
pub type Frame = heapless::String<16>;

/// Encode one register write/report frame.
pub fn encode_frame(reg: Register, value: u32) -> Frame {
    let mut frame = Frame::new();
    let _ = match reg.width_bits() {
        16 => write!(frame, "{}{:04X}", reg.letter() as char, value as u16),
        _ => write!(frame, "{}{:08X}", reg.letter() as char, value),
    };
    let _ = frame.push_str("\n\r");
    frame
}

/// Decode one received frame (terminator already stripped). Lines that do not
/// start with a known register letter, or whose payload is not hexadecimal,
/// yield `None` and are ignored by both protocol roles.
pub fn parse_frame(line: &[u8]) -> Option<(Register, u32)> {
    let (&letter, digits) = line.split_first()?;
    let reg = Register::from_letter(letter)?;
    if digits.is_empty() || digits.len() > reg.hex_digits() {
        return None;
    }
    let digits = core::str::from_utf8(digits).ok()?;
    let value = u32::from_str_radix(digits, 16).ok()?;
    Some((reg, value))
}

/// Values of every register of one module. The sub-board's copy is
/// authoritative; the master only keeps one as a shadow for write
/// verification.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFile {
    values: [u32; Register::COUNT],
}

impl RegisterFile {
    pub fn get(&self, reg: Register) -> u32 {
        self.values[reg as usize]
    }

    pub fn set(&mut self, reg: Register, value: u32) {
        self.values[reg as usize] = value;
    }
}

/// Control-register (H) bit assignment of one board type.
///
/// The voltage and current boards route their relays and mode bits
/// differently; both the master driver and the board runtime read the wiring
/// from these tables instead of hard-coding bit positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlLayout {
    /// Bit driving the output relay.
    pub output_bit: u8,
    /// Bit enabling the dithering engine on the board.
    pub dither_bit: u8,
    /// Bit switching the board into AC synthesis; `None` on boards without an
    /// AC path.
    pub ac_bit: Option<u8>,
    /// Range-select field value for ranges 1..=3.
    pub range_select: [u16; 3],
    /// Mask of the range-select field within the register.
    pub range_mask: u16,
    /// Bits mapped onto physical relay coils (bit `n` drives relay `n + 1`).
    pub relay_mask: u16,
}

/// Low-voltage board: K1 = output relay, K2/K3 = range relays, DIT = bit 3,
/// AC = bit 4.
pub const VOLTAGE_CONTROL: ControlLayout = ControlLayout {
    output_bit: 0,
    dither_bit: 3,
    ac_bit: Some(4),
    range_select: [0b0110, 0b0100, 0b0000],
    range_mask: 0b0110,
    relay_mask: 0b0111,
};

/// Current board: K1/K2 = range relays, K4 = output relay, DIT = bit 4.
pub const CURRENT_CONTROL: ControlLayout = ControlLayout {
    output_bit: 3,
    dither_bit: 4,
    ac_bit: None,
    range_select: [0b0000, 0b0001, 0b0011],
    range_mask: 0b0011,
    relay_mask: 0b1111,
};
