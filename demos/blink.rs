//! Blink example
//!
//! Cycles eight LEDs on the header and reports presses of two buttons wired
//! to pull the inputs low. Ctrl-C clears the outputs and releases every pin
//! before exiting.
//!
//! Needs access to `/dev/gpiomem`, usually by being in the `gpio` group.
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bcm_gpiomem::board::{self, GPIO05, GPIO06, GPIO16, GPIO17, GPIO22, GPIO23, GPIO24};
use bcm_gpiomem::board::{GPIO25, GPIO26, GPIO27};
use bcm_gpiomem::gpio::Pull;
use bcm_gpiomem::{open_pin, Edge, Mode, Pin};

const OUTPUTS: [u8; 8] = [GPIO16, GPIO17, GPIO22, GPIO23, GPIO24, GPIO25, GPIO26, GPIO27];
const COLORS: [&str; 8] = [
    "Red", "Green", "Blue", "Yellow", "Red", "Green", "Blue", "Yellow",
];
const INPUTS: [u8; 2] = [GPIO05, GPIO06];

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Sleep in small steps so Ctrl-C is noticed quickly
fn pause(duration: Duration) -> bool {
    let step = Duration::from_millis(10);
    let mut left = duration;
    while !left.is_zero() {
        if INTERRUPTED.load(Ordering::SeqCst) {
            return false;
        }
        let nap = left.min(step);
        thread::sleep(nap);
        left -= nap;
    }
    !INTERRUPTED.load(Ordering::SeqCst)
}

fn shutdown(outputs: Vec<Pin>, inputs: Vec<Pin>) {
    for mut pin in outputs {
        if let Err(e) = pin.clear() {
            log::warn!("clearing {pin}: {e}");
        }
        if let Err(e) = pin.close() {
            log::warn!("{e}");
        }
    }
    for pin in inputs {
        if let Err(e) = pin.close() {
            log::warn!("{e}");
        }
    }
    log::info!("pins cleared and reset, safe exit");
}

fn main() -> bcm_gpiomem::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }

    let outputs = OUTPUTS
        .iter()
        .map(|&port| open_pin(port, Mode::Output))
        .collect::<Result<Vec<_>, _>>()?;
    log::info!("outputs: {:?}", OUTPUTS.map(board::label));

    let mut inputs = INPUTS
        .iter()
        .map(|&port| open_pin(port, Mode::Input))
        .collect::<Result<Vec<_>, _>>()?;
    for input in inputs.iter_mut() {
        input.set_pull(Pull::Up)?;
        let label = input.label();
        input.begin_watch(Edge::Falling, move |event| {
            log::info!("input {label} triggered, level {:?}", event.level);
        })?;
        log::info!("now watching {} on a falling edge", input.label());
    }

    let mut outputs = outputs;
    'blink: for round in 1..=10 {
        for (pin, color) in outputs.iter_mut().zip(COLORS) {
            log::info!("loop {round} output {color}");
            pin.set()?;
            if !pause(Duration::from_millis(950)) {
                break 'blink;
            }
            pin.clear()?;
            if !pause(Duration::from_millis(50)) {
                break 'blink;
            }
        }
    }

    shutdown(outputs, inputs);
    Ok(())
}
