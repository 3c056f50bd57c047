//! Control library for a modular voltage/current calibrator.
//!
//! The instrument is a stack of boards: a controller talking to
//! interchangeable analog-output sub-boards (a low-voltage board, tag
//! `@CLVB`, and a current board, tag `@CCB`) over serial links, driven by an
//! instrument-style command language on the USB/Ethernet user ports.
//!
//! The crate contains both sides of the inter-board register protocol:
//!
//! * [`link`] / [`module`] — the master-side drivers that run on the
//!   controller: identity handshake, write-verified register updates, range
//!   selection and value-to-code conversion via [`calibration`];
//! * [`board`] / [`dither`] — the sub-board runtime: register file, relay and
//!   DAC updates, and the tick-driven sub-LSB dithering engine;
//! * [`dispatcher`] — the FUNC/VOLT/CURR command grammar and session state.
//!
//! Transports are anything implementing `embedded-io`, so the full
//! master↔board round trip runs against in-memory pipes in tests and against
//! UARTs or host serial ports in production.

#![cfg_attr(feature = "no-std", no_std)]

pub mod board;
pub mod bsp;
pub mod calibration;
pub mod channel;
pub mod dispatcher;
pub mod dither;
pub mod error;
pub mod link;
pub mod module;
pub mod register;

#[cfg(test)]
mod mock_serial;

pub use dispatcher::Calibrator;
pub use error::{Error, Result};
pub use module::AnalogOutputModule;
