//! Simulated board-side device logic.
//!
//! A device runs on its own thread, blocking on the ingress FIFO for a
//! mode selector and publishing results back into the register space,
//! exactly as the hardware side of the protocol would.

use std::io;
use std::sync::Arc;
use std::thread;

use rand::Rng;
use tracing::{debug, info, warn};

use crate::command::CommandWord;
use crate::regmap::{
    ADC_FULL_SCALE, HISTORY_BASE, MODE_PROGRAM, MODE_SELF_TEST, PROGRAM_RESULT_ADDR, RAMP_STEPS,
    RESULT_ID_ADDR, RESULT_NONE, RESULT_PROGRAM_DONE, RESULT_SELFTEST_DONE, SELFTEST_BASE,
    SELFTEST_SLOTS, SHUTDOWN_WORD, STATUS_ADDR, STATUS_BUSY, STATUS_READY, WORD_STRIDE,
};
use crate::space::RegisterSpace;

/// Simulated device consuming commands from the ingress FIFO.
#[derive(Debug)]
pub struct DeviceSim {
    space: Arc<RegisterSpace>,
}

impl DeviceSim {
    /// Creates a device bound to the shared register space.
    #[must_use]
    pub const fn new(space: Arc<RegisterSpace>) -> Self {
        Self { space }
    }

    /// Spawns the device loop on a named thread.
    ///
    /// # Errors
    ///
    /// Returns the OS error when the thread cannot be spawned.
    pub fn spawn(self) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("device-sim".to_owned())
            .spawn(move || self.run())
    }

    /// Runs the device loop until the shutdown sentinel is dequeued or
    /// the ingress channel is torn down.
    pub fn run(&self) {
        self.poke(STATUS_ADDR, STATUS_READY);
        loop {
            let mode = match self.space.recv_command() {
                Ok(mode) => mode,
                Err(fault) => {
                    warn!("ingress dequeue failed ({fault}), stopping device loop");
                    break;
                }
            };
            debug!("dequeued mode selector {mode:#x}");
            if mode == SHUTDOWN_WORD {
                break;
            }
            self.work(mode);
        }
        info!("device simulation stopped");
    }

    fn work(&self, mode: u32) {
        match mode {
            MODE_SELF_TEST => self.self_test(),
            MODE_PROGRAM => self.program(),
            other => warn!("unknown device mode {other:#x}, ignoring"),
        }
    }

    /// Self-test: publish one pseudo-random ADC word per matrix element.
    fn self_test(&self) {
        self.poke(STATUS_ADDR, STATUS_BUSY);
        self.poke(RESULT_ID_ADDR, RESULT_NONE);
        info!("running matrix self-test");
        let mut rng = rand::thread_rng();
        for slot in 0..SELFTEST_SLOTS {
            let value = rng.gen_range(0..=ADC_FULL_SCALE);
            self.poke(SELFTEST_BASE + slot * WORD_STRIDE, value);
        }
        self.poke(RESULT_ID_ADDR, RESULT_SELFTEST_DONE);
        self.poke(STATUS_ADDR, STATUS_READY);
    }

    /// Program: two-phase handshake, then a linear resistance ramp.
    ///
    /// The mode selector has already been consumed; the command word
    /// arrives as a second blocking dequeue.
    fn program(&self) {
        self.poke(STATUS_ADDR, STATUS_BUSY);
        self.poke(RESULT_ID_ADDR, RESULT_NONE);
        info!("running element programming, waiting for the command word");
        let word = match self.space.recv_command() {
            Ok(word) => word,
            Err(fault) => {
                warn!("lost the command word: {fault}");
                self.poke(STATUS_ADDR, STATUS_READY);
                return;
            }
        };
        let cmd = CommandWord::unpack(word);
        debug!(
            "command word: target={} tolerance={} attempts={} history={} element={}",
            cmd.target, cmd.tolerance, cmd.attempts, cmd.history, cmd.element
        );

        let step = f64::from(ADC_FULL_SCALE) / f64::from(RAMP_STEPS);
        let num = u32::from(cmd.target) * RAMP_STEPS / ADC_FULL_SCALE;
        let mut resistance = 0.0_f64;
        for i in 0..num {
            resistance += step;
            if cmd.history {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                self.poke(HISTORY_BASE + i * WORD_STRIDE, resistance as u32);
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        self.poke(PROGRAM_RESULT_ADDR, resistance as u32);
        self.poke(RESULT_ID_ADDR, RESULT_PROGRAM_DONE);
        self.poke(STATUS_ADDR, STATUS_READY);
    }

    /// Store helper: the device only writes fixed in-window registers,
    /// so a store fault is a bug worth logging, not a reason to die.
    fn poke(&self, addr: u32, word: u32) {
        if let Err(fault) = self.space.store(addr, word) {
            warn!("device store to {addr:#010x} failed: {fault}");
        }
    }
}
