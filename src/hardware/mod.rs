//! Hardware collaborator contracts.
//!
//! The analyzer core never talks to a peripheral directly. Everything it
//! needs from the board — the DMA sample stream, the converter calibration,
//! the relay bank, persistent storage and a millisecond clock — enters
//! through the traits in this module, so the concrete drivers stay outside
//! the crate and the core runs unchanged on the host during tests.

use embedded_hal::digital::v2::StatefulOutputPin;
use log::{error, warn};

pub mod design_parameters;
pub mod frame;
pub mod kv;

pub use kv::{BlobStore, KvLayout, KvStore};

use design_parameters::NUM_LOADS;

/// Monotonic millisecond clock. Readings wrap; all consumers subtract with
/// wrapping arithmetic.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Outcome of one frame read from the sample provider.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// The buffer holds `n` bytes of sample records.
    Ok,
    /// No frame arrived within the provider's deadline.
    Timeout,
    /// The DMA ring overran because frames were not drained fast enough.
    /// Sample data was lost; the stream continues.
    Overflow,
}

/// Continuous-conversion sample source backed by DMA.
pub trait SampleProvider {
    /// Begin continuous conversion.
    fn start(&mut self);

    /// Block until a frame is available and copy it into `buf`.
    ///
    /// On [FrameStatus::Ok] the byte count is a whole number of sample
    /// records of [frame::RECORD_BYTES] bytes.
    fn read_frame(&mut self, buf: &mut [u8]) -> (usize, FrameStatus);
}

/// The converter's calibration lookup failed for this count.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CalibrationError;

/// Hardware calibration: raw converter counts to millivolts at the pin.
pub trait Calibrator {
    fn raw_to_mv(&self, raw: u16) -> Result<i16, CalibrationError>;
}

/// The bank of relay outputs driving the loads.
pub trait LoadBank {
    /// Drive load `id` to `on`, best effort with read-back.
    ///
    /// Returns true iff the hardware reflects the requested state.
    fn update(&mut self, id: usize, on: bool) -> bool;

    /// Report the hardware-observed logical state of every load.
    fn read_all(&mut self, out: &mut [bool; NUM_LOADS]);
}

/// [LoadBank] over plain GPIO pins.
///
/// The relay drivers are optocoupled and active low by default; the polarity
/// is configurable for other driver boards. Writes are retried a few times
/// and verified by reading the output latch back.
pub struct PinLoads<P> {
    pins: [P; NUM_LOADS],
    active_low: bool,
}

impl<P: StatefulOutputPin> PinLoads<P> {
    pub fn new(pins: [P; NUM_LOADS], active_low: bool) -> Self {
        Self { pins, active_low }
    }

    /// Drive every load off. Called once at bring-up so the relays start in
    /// a known state.
    pub fn disable_all(&mut self) {
        for id in 0..NUM_LOADS {
            if !self.update(id, false) {
                warn!("load {} could not be disabled at init", id);
            }
        }
    }
}

impl<P: StatefulOutputPin> LoadBank for PinLoads<P> {
    fn update(&mut self, id: usize, on: bool) -> bool {
        if id >= NUM_LOADS {
            return false;
        }

        let level = on != self.active_low;
        let pin = &mut self.pins[id];

        for attempt in 1..=3u8 {
            let written = if level { pin.set_high() } else { pin.set_low() };
            if written.is_err() {
                warn!("attempt {}: load {} write failed", attempt, id);
                continue;
            }
            if matches!(pin.is_set_high(), Ok(l) if l == level) {
                return true;
            }
            warn!("attempt {}: load {} read-back mismatch", attempt, id);
        }

        error!("load {} failed to update", id);
        false
    }

    fn read_all(&mut self, out: &mut [bool; NUM_LOADS]) {
        for (pin, state) in self.pins.iter_mut().zip(out.iter_mut()) {
            *state = match pin.is_set_high() {
                Ok(level) => level != self.active_low,
                Err(_) => {
                    warn!("load state read failed");
                    false
                }
            };
        }
    }
}
