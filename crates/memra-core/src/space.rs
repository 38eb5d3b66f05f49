//! Addressable 32-bit register space with a single-slot ingress FIFO.
//!
//! Every in-window address holds an independent atomic word cell, except
//! the ingress address, which is a bounded blocking channel of capacity 1.
//! The channel is the only shared-mutation handoff point between the
//! controller side and the device-simulation side.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;

use crate::fault::Fault;
use crate::regmap::{window_offset, INGRESS_ADDR, WINDOW_BYTES};

/// Shared register space for one board instance.
///
/// Created once at process start and handed by `Arc` to both the memory
/// controller and the device simulation.
#[derive(Debug)]
pub struct RegisterSpace {
    cells: Vec<AtomicU32>,
    ingress_tx: SyncSender<u32>,
    ingress_rx: Mutex<Receiver<u32>>,
}

impl Default for RegisterSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterSpace {
    /// Creates a zero-initialized register space.
    #[must_use]
    pub fn new() -> Self {
        let (ingress_tx, ingress_rx) = sync_channel(1);
        Self {
            cells: (0..WINDOW_BYTES).map(|_| AtomicU32::new(0)).collect(),
            ingress_tx,
            ingress_rx: Mutex::new(ingress_rx),
        }
    }

    fn cell(&self, addr: u32) -> Result<&AtomicU32, Fault> {
        let offset = window_offset(addr).ok_or(Fault::AddressOutOfRange { addr })?;
        Ok(&self.cells[offset as usize])
    }

    /// Reads the word stored at `addr`.
    ///
    /// The ingress address is not a readable cell on the driver side: it
    /// reads as 0 and does not consume the queued command.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AddressOutOfRange`] when `addr` is outside the
    /// provisioned window.
    pub fn load(&self, addr: u32) -> Result<u32, Fault> {
        if addr == INGRESS_ADDR {
            return Ok(0);
        }
        Ok(self.cell(addr)?.load(Ordering::SeqCst))
    }

    /// Stores `word` at `addr`.
    ///
    /// At the ingress address this is a blocking enqueue: the call parks
    /// until the single slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::AddressOutOfRange`] when `addr` is outside the
    /// provisioned window, or [`Fault::ChannelClosed`] when the ingress
    /// consumer has gone away.
    pub fn store(&self, addr: u32, word: u32) -> Result<(), Fault> {
        if addr == INGRESS_ADDR {
            return self
                .ingress_tx
                .send(word)
                .map_err(|_| Fault::ChannelClosed);
        }
        self.cell(addr)?.store(word, Ordering::SeqCst);
        Ok(())
    }

    /// Dequeues the next command word from the ingress FIFO, blocking
    /// until a producer enqueues one.
    ///
    /// This is the device-simulation consumer end; there is exactly one
    /// logical consumer per space.
    ///
    /// # Errors
    ///
    /// Returns [`Fault::ChannelClosed`] when every producer handle has
    /// been dropped.
    pub fn recv_command(&self) -> Result<u32, Fault> {
        let rx = self.ingress_rx.lock().map_err(|_| Fault::ChannelClosed)?;
        rx.recv().map_err(|_| Fault::ChannelClosed)
    }
}
