//! Talk to a physical sub-board over a host serial port.
//!
//! Runs the identity handshake against whatever board is wired to the chosen
//! port, then steps the output through a few DC setpoints:
//!
//! ```text
//! cargo run --example serial [/dev/ttyUSB0]
//! ```

use std::env;
use std::io::ErrorKind;

use embedded_hal::delay::DelayNs;
use inquire::Select;
use serialport::SerialPort;
use vc_calibrator::AnalogOutputModule;
use vc_calibrator::calibration::CalConstants;

const BAUD_RATE: u32 = 9_600;
// short port timeout; the protocol layer does its own bounded waiting
const PORT_TIMEOUT_MS: u64 = 20;

const SETPOINTS_V: [f64; 3] = [0.0, 1.5, -1.5];

pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            ErrorKind::TimedOut => embedded_io::ErrorKind::TimedOut,
            ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        match std::io::Read::read(&mut self.0, buf) {
            Ok(n) => Ok(n),
            // a quiet wire is not an error at this layer
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(IoError(e)),
        }
    }
}

impl embedded_io::ReadReady for PortWrapper {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.0.bytes_to_read().map_err(|e| IoError(e.into()))? > 0)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
    }
}

fn main() {
    let port_name = env::args().nth(1).unwrap_or_else(|| {
        let ports = serialport::available_ports().expect("failed to enumerate serial ports");
        if ports.is_empty() {
            eprintln!("No serial ports found!");
            std::process::exit(1);
        }
        let names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();
        Select::new("Select the CLVB serial port:", names)
            .prompt()
            .expect("failed to select port")
    });

    println!("Using port: {port_name}");
    let port = serialport::new(&port_name, BAUD_RATE)
        .timeout(std::time::Duration::from_millis(PORT_TIMEOUT_MS))
        .open()
        .expect("failed to open serial port");

    let mut module = AnalogOutputModule::low_voltage(
        PortWrapper(port),
        StdDelay,
        // corrections for the individual board would be loaded here
        [CalConstants::IDEAL; 3],
    );

    match module.connect() {
        Ok(()) => println!("Handshake OK, default range {}", module.state().range),
        Err(e) => {
            eprintln!("Bring-up failed: {e}");
            std::process::exit(1);
        }
    }

    module.set_range(3).expect("range select failed");
    module.set_output(true).expect("output relay failed");

    for setpoint in SETPOINTS_V {
        module.set_dc(setpoint).expect("setpoint rejected");
        println!(
            "set {:+.5} V  (code {:#07X})",
            setpoint,
            module
                .profile()
                .value_to_code(setpoint, module.state().range, false)
                .unwrap()
        );
        std::thread::sleep(std::time::Duration::from_secs(1));
    }

    module.shutdown().expect("shutdown failed");
    println!("Output parked at 0 V, relay open.");
}
