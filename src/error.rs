//! Error taxonomy of the calibrator firmware.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

/// One variant per instrument error code. Every failure is reported to the user
/// channel as a single line and leaves the device live; none are fatal.
///
/// The display strings are the exact messages emitted on the remote-control
/// channel (`ERROR: <message>.`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Malformed argument, or no line terminator arrived within the command
    /// read timeout.
    #[error("Wrong input")]
    UserInput,
    /// Line does not match any known command.
    #[error("Unknown command")]
    UnknownCommand,
    /// Protocol timeout, unreadable response, or write-verify mismatch.
    #[error("Unsuccessful communication with module (internal problem)")]
    Communication,
    /// The identity handshake returned a tag for a different board type.
    #[error("Wrong module is connected to UART line (internal problem)")]
    WrongModule,
    #[error("Voltage module is not selected")]
    VoltNotSelected,
    #[error("Current module is not selected")]
    CurrNotSelected,
    #[error("Voltage is out of range")]
    VoltRange,
    #[error("Current is out of range")]
    CurrRange,
    #[error("Frequency is out of range")]
    FreqRange,
    #[error("Requested range does not exist")]
    NonexistentRange,
}
