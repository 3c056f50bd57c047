//! Instrument command language and session state.
//!
//! The controller exposes the FUNC/VOLT/CURR command families to the user
//! channels (USB and Ethernet carry the same grammar). Commands are
//! case-insensitive and normalized to uppercase; every response line ends
//! `\n\r`; failures are reported as a single `ERROR: <message>.` line and the
//! instrument stays live.

use core::fmt::Write as _;

use embedded_hal::delay::DelayNs;
use embedded_io::{Read, ReadReady, Write};
use fugit::MillisDurationU32;

use crate::channel::LineChannel;
use crate::error::{Error, Result};
use crate::module::{AnalogOutputModule, Mode};

/// Cumulative wait for the terminator of a started command line.
pub const COMMAND_TIMEOUT: MillisDurationU32 = MillisDurationU32::millis(1_000);

const MAX_COMMAND: usize = 48;
const MAX_REPLY: usize = 96;

/// One response line (possibly empty for set-commands).
pub type Reply = heapless::String<MAX_REPLY>;

pub type Command = heapless::String<MAX_COMMAND>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SelectedModule {
    #[default]
    None,
    Voltage,
    Current,
}

/// The instrument: both module drivers plus the command session.
///
/// There is exactly one logical control session; both user channels address
/// the same instance.
pub struct Calibrator<SV, SC, D> {
    voltage: AnalogOutputModule<SV, D>,
    current: AnalogOutputModule<SC, D>,
    selected: SelectedModule,
}

impl<SV, SC, D> Calibrator<SV, SC, D>
where
    SV: Read + Write + ReadReady,
    SC: Read + Write + ReadReady,
    D: DelayNs,
{
    pub fn new(voltage: AnalogOutputModule<SV, D>, current: AnalogOutputModule<SC, D>) -> Self {
        Self {
            voltage,
            current,
            selected: SelectedModule::None,
        }
    }

    pub fn selected(&self) -> SelectedModule {
        self.selected
    }

    pub fn voltage_module(&self) -> &AnalogOutputModule<SV, D> {
        &self.voltage
    }

    pub fn current_module(&self) -> &AnalogOutputModule<SC, D> {
        &self.current
    }

    /// Bring both sub-boards up. Returned per module so the caller can report
    /// each bring-up failure; a failed module stays unselectable.
    pub fn connect(&mut self) -> (Result<()>, Result<()>) {
        (self.voltage.connect(), self.current.connect())
    }

    /// Service one user channel: read at most one command line and send the
    /// reply. Returns after one line or one timeout, so round-robin servicing
    /// of the other channel is never starved.
    pub fn service<S: Read + Write + ReadReady>(
        &mut self,
        user: &mut LineChannel<S>,
        delay: &mut impl DelayNs,
    ) {
        if user.available() == 0 {
            return;
        }
        let reply = match read_command(user, delay) {
            Ok(command) => self.execute(&command),
            Err(error) => error_reply(error),
        };
        if !reply.is_empty() {
            let _ = user.send(reply.as_bytes());
        }
    }

    /// Execute one command line and produce the response. Set-commands reply
    /// with nothing on success.
    pub fn execute(&mut self, command: &str) -> Reply {
        let command = command.trim();
        if command.is_empty() {
            return Reply::new();
        }
        let result = if command.starts_with("FUNC") {
            self.handle_func(command)
        } else if command.starts_with("VOLT") {
            self.handle_volt(command)
        } else if command.starts_with("CURR") {
            self.handle_curr(command)
        } else {
            Err(Error::UnknownCommand)
        };
        match result {
            Ok(reply) => reply,
            Err(error) => error_reply(error),
        }
    }

    fn handle_func(&mut self, command: &str) -> Result<Reply> {
        let mut reply = Reply::new();
        match command.strip_prefix("FUNC").map(str::trim) {
            Some("VOLT") => self.select(SelectedModule::Voltage)?,
            Some("CURR") => self.select(SelectedModule::Current)?,
            Some("?") => {
                let name = match self.selected {
                    SelectedModule::None => "NONE",
                    SelectedModule::Voltage => "VOLT",
                    SelectedModule::Current => "CURR",
                };
                let _ = write!(reply, "{name}\n\r");
            }
            _ => return Err(Error::UserInput),
        }
        Ok(reply)
    }

    fn select(&mut self, which: SelectedModule) -> Result<()> {
        // a module that failed bring-up stays unselectable until restart
        let fault = match which {
            SelectedModule::Voltage => self.voltage.fault(),
            SelectedModule::Current => self.current.fault(),
            SelectedModule::None => None,
        };
        if let Some(error) = fault {
            return Err(error);
        }
        self.selected = which;
        Ok(())
    }

    fn handle_volt(&mut self, command: &str) -> Result<Reply> {
        if self.selected != SelectedModule::Voltage {
            return Err(Error::VoltNotSelected);
        }
        let module = &mut self.voltage;
        let mut reply = Reply::new();

        if let Some(rest) = command.strip_prefix("VOLT:FREQ") {
            match split_tail(rest)? {
                Tail::Query => {
                    let _ = write!(reply, "{:.7} Hz\n\r", module.state().frequency);
                }
                Tail::Arg(arg) => module.set_frequency(parse_number(arg)?)?,
            }
        } else if let Some(rest) = command.strip_prefix("VOLT:RANG:AUTO") {
            match split_tail(rest)? {
                Tail::Arg("ON") => module.set_autorange(true),
                Tail::Arg("OFF") => module.set_autorange(false),
                Tail::Query => {
                    let state = if module.state().autorange_on { "ON" } else { "OFF" };
                    let _ = write!(reply, "Autorange is {state}.\n\r");
                }
                Tail::Arg(_) => return Err(Error::UnknownCommand),
            }
        } else if let Some(rest) = command.strip_prefix("VOLT:RANG") {
            match split_tail(rest)? {
                Tail::Query => {
                    let _ = write!(reply, "{}\n\r", module.state().range);
                }
                Tail::Arg(arg) => {
                    let range: u8 = arg.parse().map_err(|_| Error::UserInput)?;
                    module.set_range(range)?;
                }
            }
        } else if let Some(rest) = command.strip_prefix("VOLT:MODE") {
            match split_tail(rest)? {
                // mode switches re-apply the stored amplitude (and frequency)
                Tail::Arg("DC") => {
                    let value = module.state().value;
                    module.set_dc(value)?;
                }
                Tail::Arg("AC") => {
                    let state = *module.state();
                    module.set_ac(state.value, state.frequency)?;
                }
                Tail::Query => {
                    let mode = match module.state().mode {
                        Mode::Dc => "DC",
                        Mode::Ac => "AC",
                    };
                    let _ = write!(reply, "{mode} mode.\n\r");
                }
                Tail::Arg(_) => return Err(Error::UnknownCommand),
            }
        } else if let Some(rest) = command.strip_prefix("VOLT:OUTP") {
            match split_tail(rest)? {
                Tail::Arg("ON") => module.set_output(true)?,
                Tail::Arg("OFF") => module.set_output(false)?,
                Tail::Query => {
                    let state = if module.state().output_on { "ON" } else { "OFF" };
                    let _ = write!(reply, "Output {state}.\n\r");
                }
                Tail::Arg(_) => return Err(Error::UnknownCommand),
            }
        } else if command == "VOLT?" {
            let state = module.state();
            let _ = write!(
                reply,
                "{:.*} V\n\r",
                range_precision(state.range),
                state.value
            );
        } else if let Some(arg) = command.strip_prefix("VOLT ") {
            let value = parse_number(arg)?;
            match module.state().mode {
                Mode::Dc => module.set_dc(value)?,
                Mode::Ac => {
                    let frequency = module.state().frequency;
                    module.set_ac(value, frequency)?;
                }
            }
        } else {
            return Err(Error::UnknownCommand);
        }
        Ok(reply)
    }

    fn handle_curr(&mut self, command: &str) -> Result<Reply> {
        if self.selected != SelectedModule::Current {
            return Err(Error::CurrNotSelected);
        }
        let module = &mut self.current;
        let mut reply = Reply::new();

        if let Some(rest) = command.strip_prefix("CURR:RANG:AUTO") {
            match split_tail(rest)? {
                Tail::Arg("ON") => module.set_autorange(true),
                Tail::Arg("OFF") => module.set_autorange(false),
                Tail::Query => {
                    let state = if module.state().autorange_on { "ON" } else { "OFF" };
                    let _ = write!(reply, "Autorange is {state}.\n\r");
                }
                Tail::Arg(_) => return Err(Error::UnknownCommand),
            }
        } else if let Some(rest) = command.strip_prefix("CURR:RANG") {
            match split_tail(rest)? {
                Tail::Query => {
                    let _ = write!(reply, "{}\n\r", module.state().range);
                }
                Tail::Arg(arg) => {
                    let range: u8 = arg.parse().map_err(|_| Error::UserInput)?;
                    module.set_range(range)?;
                }
            }
        } else if let Some(rest) = command.strip_prefix("CURR:OUTP") {
            match split_tail(rest)? {
                Tail::Arg("ON") => module.set_output(true)?,
                Tail::Arg("OFF") => module.set_output(false)?,
                Tail::Query => {
                    let state = if module.state().output_on { "ON" } else { "OFF" };
                    let _ = write!(reply, "Output {state}.\n\r");
                }
                Tail::Arg(_) => return Err(Error::UnknownCommand),
            }
        } else if command == "CURR?" {
            let state = module.state();
            let _ = write!(
                reply,
                "{:.*} A\n\r",
                range_precision(state.range),
                state.value
            );
        } else if let Some(arg) = command.strip_prefix("CURR ") {
            module.set_dc(parse_number(arg)?)?;
        } else {
            return Err(Error::UnknownCommand);
        }
        Ok(reply)
    }
}

/// Remainder of a command line after a recognized head.
enum Tail<'a> {
    Query,
    Arg(&'a str),
}

/// A head must be followed by `?` or a space-led argument; anything glued on
/// makes the line a different, unknown command.
fn split_tail(rest: &str) -> Result<Tail<'_>> {
    if rest == "?" {
        Ok(Tail::Query)
    } else if rest.starts_with(' ') {
        Ok(Tail::Arg(rest.trim()))
    } else {
        Err(Error::UnknownCommand)
    }
}

/// Fractional digits for value replies; coarser ranges resolve less.
fn range_precision(range: u8) -> usize {
    match range {
        1 => 7,
        2 => 6,
        _ => 5,
    }
}

fn parse_number(arg: &str) -> Result<f64> {
    arg.trim().parse().map_err(|_| Error::UserInput)
}

fn error_reply(error: Error) -> Reply {
    let mut reply = Reply::new();
    let _ = write!(reply, "ERROR: {error}.\n\r");
    reply
}

/// Read one command line from a user channel, normalized to uppercase.
///
/// The user gets [`COMMAND_TIMEOUT`] to finish a started line with a
/// terminator; running out of time is a user-input error, not a protocol one.
pub fn read_command<S: Read + Write + ReadReady>(
    user: &mut LineChannel<S>,
    delay: &mut impl DelayNs,
) -> Result<Command> {
    let line = user
        .read_line(COMMAND_TIMEOUT, delay)
        .ok_or(Error::UserInput)?;
    let mut command = Command::new();
    for &byte in line.iter() {
        command
            .push(byte.to_ascii_uppercase() as char)
            .map_err(|_| Error::UserInput)?;
    }
    Ok(command)
}
