//! # Edge watchers
//!
//! Each watched pin gets its own thread which polls the event status bit of
//! its port. When the bit is latched the callback runs, then the bit is
//! cleared by writing 1 to it. The thread only holds a [`Weak`] reference to
//! the watch state, so it exits when the handle goes away or asks it to stop,
//! checking before every register read.
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::pin::{Edge, GpioInner, Level};
use super::reg::{RegisterBank, Registers};
use crate::board;
use crate::error::{Error, Result};

/// One observed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub port: u8,
    /// Level read right after the event was seen. With [`Edge::Both`] this tells the two
    /// directions apart, unless the port changed again in between.
    pub level: Level,
    pub timestamp: Instant,
}

#[derive(Debug)]
struct WatchState {
    stop: AtomicBool,
}

#[derive(Debug)]
pub(crate) struct Watch {
    port: u8,
    edge: Edge,
    state: Arc<WatchState>,
    thread: Option<JoinHandle<()>>,
    errors: Mutex<Receiver<Error>>,
}

impl Watch {
    pub(crate) fn start<F>(
        gpio: Arc<GpioInner>,
        port: u8,
        edge: Edge,
        callback: F,
    ) -> Result<Watch>
    where
        F: FnMut(EdgeEvent) + Send + 'static,
    {
        // A stale event must not fire the callback right away
        gpio.regs.set_bit(port, RegisterBank::EventStatus)?;
        if let Err(e) = enable(&gpio.regs, port, edge) {
            disable(&gpio.regs, port)?;
            return Err(e);
        }

        let state = Arc::new(WatchState {
            stop: AtomicBool::new(false),
        });
        let (tx, errors) = mpsc::channel();
        let weak = Arc::downgrade(&state);
        let worker = gpio.clone();
        let spawned = thread::Builder::new()
            .name(format!("gpio-watch-{port}"))
            .spawn(move || run(worker, port, weak, callback, tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                disable(&gpio.regs, port)?;
                return Err(e.into());
            }
        };
        log::debug!("watching {} for {:?} edges", board::label(port), edge);
        Ok(Watch {
            port,
            edge,
            state,
            thread: Some(thread),
            errors: Mutex::new(errors),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    pub(crate) fn take_error(&self) -> Option<Error> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .try_recv()
            .ok()
    }

    /// Stop and join the thread, then disable detection and drop any latched event
    pub(crate) fn stop(mut self, regs: &Registers) -> Result<()> {
        self.join();
        disable(regs, self.port)?;
        regs.set_bit(self.port, RegisterBank::EventStatus)?;
        log::debug!(
            "stopped watching {} for {:?} edges",
            board::label(self.port),
            self.edge
        );
        Ok(())
    }

    fn join(&mut self) {
        self.state.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                log::error!("watcher thread of {} panicked", board::label(self.port));
            }
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.join();
    }
}

fn enable(regs: &Registers, port: u8, edge: Edge) -> Result<()> {
    if edge.rising() {
        regs.set_bit(port, RegisterBank::RisingEdgeEnable)?;
    }
    if edge.falling() {
        regs.set_bit(port, RegisterBank::FallingEdgeEnable)?;
    }
    Ok(())
}

fn disable(regs: &Registers, port: u8) -> Result<()> {
    regs.clear_bit(port, RegisterBank::RisingEdgeEnable)?;
    regs.clear_bit(port, RegisterBank::FallingEdgeEnable)
}

fn run<F>(
    gpio: Arc<GpioInner>,
    port: u8,
    state: Weak<WatchState>,
    mut callback: F,
    errors: Sender<Error>,
) where
    F: FnMut(EdgeEvent),
{
    loop {
        let running = state
            .upgrade()
            .map_or(false, |s| !s.stop.load(Ordering::Acquire));
        if !running {
            break;
        }
        if let Err(e) = poll(&gpio.regs, port, &mut callback) {
            log::error!("edge watch on {} failed: {}", board::label(port), e);
            // Nobody may be listening anymore, the log entry above is enough then
            let _ = errors.send(e);
            break;
        }
        thread::park_timeout(gpio.poll_interval);
    }
}

fn poll<F>(regs: &Registers, port: u8, callback: &mut F) -> Result<()>
where
    F: FnMut(EdgeEvent),
{
    if !regs.read_bit(port, RegisterBank::EventStatus)? {
        return Ok(());
    }
    let level = regs.read_bit(port, RegisterBank::Level)?.into();
    log::trace!("edge on {}, now {:?}", board::label(port), level);
    let event = EdgeEvent {
        port,
        level,
        timestamp: Instant::now(),
    };
    panic::catch_unwind(AssertUnwindSafe(|| callback(event)))
        .map_err(|_| Error::CallbackPanicked(port))?;
    // Write-1-to-clear
    regs.set_bit(port, RegisterBank::EventStatus)
}
