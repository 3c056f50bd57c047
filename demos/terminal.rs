//! Interactive instrument terminal against fully simulated sub-boards.
//!
//! Both board runtimes run in-process behind in-memory pipes, so the whole
//! command → protocol → relay/DAC path is live without hardware:
//!
//! ```text
//! cargo run --example terminal
//! > FUNC VOLT
//! > VOLT:RANG:AUTO ON
//! > VOLT 0.1
//! > VOLT:RANG?
//! 1
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use inquire::Text;
use vc_calibrator::board::OutputBoard;
use vc_calibrator::bsp::dac::Dac;
use vc_calibrator::bsp::relay::RelayBank;
use vc_calibrator::bsp::tick::Ticker;
use vc_calibrator::calibration::CalConstants;
use vc_calibrator::dither::DitherCell;
use vc_calibrator::{AnalogOutputModule, Calibrator};

#[derive(Clone)]
struct PipeEnd {
    rx: Rc<RefCell<VecDeque<u8>>>,
    tx: Rc<RefCell<VecDeque<u8>>>,
}

fn pipe_pair() -> (PipeEnd, PipeEnd) {
    let a = Rc::new(RefCell::new(VecDeque::new()));
    let b = Rc::new(RefCell::new(VecDeque::new()));
    (
        PipeEnd {
            rx: Rc::clone(&a),
            tx: Rc::clone(&b),
        },
        PipeEnd { rx: b, tx: a },
    )
}

impl embedded_io::ErrorType for PipeEnd {
    type Error = core::convert::Infallible;
}

impl embedded_io::Read for PipeEnd {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut rx = self.rx.borrow_mut();
        let mut count = 0;
        while count < buf.len() {
            match rx.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl embedded_io::ReadReady for PipeEnd {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.borrow().is_empty())
    }
}

impl embedded_io::Write for PipeEnd {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx.borrow_mut().extend(buf.iter().copied());
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct SimDac(Rc<Cell<u32>>);

impl Dac for SimDac {
    fn set_code(&mut self, code: u32) {
        self.0.set(code);
    }
}

#[derive(Clone, Default)]
struct SimRelays(Rc<Cell<u16>>);

impl RelayBank for SimRelays {
    fn set(&mut self, index: u8) {
        self.0.set(self.0.get() | 1 << (index - 1));
    }

    fn reset(&mut self, index: u8) {
        self.0.set(self.0.get() & !(1 << (index - 1)));
    }
}

#[derive(Clone, Default)]
struct SimTicker(Rc<Cell<bool>>);

impl Ticker for SimTicker {
    fn enable(&mut self) {
        self.0.set(true);
    }

    fn disable(&mut self) {
        self.0.set(false);
    }
}

type SimBoard = OutputBoard<'static, PipeEnd, SimDac, SimRelays, SimTicker>;

/// The master yields to the simulated board whenever it would wait on the
/// wire, exactly like the two MCUs interleave in the real instrument.
struct BoardDelay(Rc<RefCell<SimBoard>>);

impl DelayNs for BoardDelay {
    fn delay_ns(&mut self, _ns: u32) {
        self.0.borrow_mut().run_once();
    }
}

struct SimModule {
    dac: SimDac,
    relays: SimRelays,
    ticker: SimTicker,
}

fn spawn_board(voltage: bool) -> (PipeEnd, BoardDelay, SimModule) {
    let (master, device) = pipe_pair();
    let dither: &'static DitherCell = Box::leak(Box::new(DitherCell::new()));
    let dac = SimDac::default();
    let relays = SimRelays::default();
    let ticker = SimTicker::default();
    let board = if voltage {
        OutputBoard::voltage(device, dac.clone(), relays.clone(), ticker.clone(), dither)
    } else {
        OutputBoard::current(device, dac.clone(), relays.clone(), ticker.clone(), dither)
    };
    let board = Rc::new(RefCell::new(board));
    (
        master,
        BoardDelay(board),
        SimModule {
            dac,
            relays,
            ticker,
        },
    )
}

fn main() {
    let (volt_io, volt_delay, volt_sim) = spawn_board(true);
    let (curr_io, curr_delay, curr_sim) = spawn_board(false);

    let mut calibrator = Calibrator::new(
        AnalogOutputModule::low_voltage(volt_io, volt_delay, [CalConstants::IDEAL; 3]),
        AnalogOutputModule::current(curr_io, curr_delay, [CalConstants::IDEAL; 3]),
    );

    let (volt_up, curr_up) = calibrator.connect();
    println!(
        "[CLVB {}]",
        volt_up.map_or_else(|e| format!("ERROR: {e}"), |_| "NO_ERROR".into())
    );
    println!(
        "[CCB {}]",
        curr_up.map_or_else(|e| format!("ERROR: {e}"), |_| "NO_ERROR".into())
    );
    println!("Commands: FUNC VOLT | VOLT 1.5 | VOLT:RANG? | ... (exit to quit)");

    loop {
        let Ok(line) = Text::new(">").prompt() else {
            break;
        };
        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        let reply = calibrator.execute(&line.to_uppercase());
        if !reply.is_empty() {
            print!("{}", reply.replace("\n\r", "\n"));
        }
        println!(
            "  CLVB: dac={:#07X} relays={:04b} dith={}   CCB: dac={:#07X} relays={:04b} dith={}",
            volt_sim.dac.0.get(),
            volt_sim.relays.0.get(),
            volt_sim.ticker.0.get(),
            curr_sim.dac.0.get(),
            curr_sim.relays.0.get(),
            curr_sim.ticker.0.get(),
        );
    }
}
