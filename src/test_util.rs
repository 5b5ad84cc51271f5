//! Mock collaborators shared by the module tests.

use core::cell::Cell;
use std::collections::VecDeque;
use std::vec::Vec;

use crate::hardware::design_parameters::NUM_LOADS;
use crate::hardware::frame::RECORD_BYTES;
use crate::hardware::{
    CalibrationError, Calibrator, Clock, FrameStatus, KvStore, LoadBank,
    SampleProvider,
};
use crate::settings::SysCfg;

/// Hand-stepped millisecond clock.
pub struct MockClock(Cell<u32>);

impl MockClock {
    pub fn new() -> Self {
        Self(Cell::new(0))
    }

    pub fn set(&self, ms: u32) {
        self.0.set(ms);
    }

    pub fn advance(&self, ms: u32) {
        self.0.set(self.0.get().wrapping_add(ms));
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

/// In-memory [KvStore] that records every energy save.
#[derive(Default)]
pub struct MockKv {
    pub cfg: Option<SysCfg>,
    pub energy: f64,
    pub energy_saves: Vec<f64>,
    pub fail_saves: bool,
}

impl KvStore for MockKv {
    fn save_cfg(&mut self, cfg: &SysCfg) -> bool {
        self.cfg = Some(*cfg);
        true
    }

    fn load_cfg(&mut self, cfg: &mut SysCfg) -> bool {
        match self.cfg {
            Some(stored) => {
                *cfg = stored;
                true
            }
            None => false,
        }
    }

    fn save_energy(&mut self, kwh: f64) -> bool {
        if self.fail_saves {
            return false;
        }
        self.energy = kwh;
        self.energy_saves.push(kwh);
        true
    }

    fn load_energy(&mut self) -> f64 {
        self.energy
    }

    fn reset_defaults(&mut self) -> bool {
        self.cfg = None;
        self.energy = 0.0;
        true
    }
}

/// Relay bank that records every write and can refuse them per load.
#[derive(Default)]
pub struct MockLoads {
    pub hw: [bool; NUM_LOADS],
    pub fail_mask: [bool; NUM_LOADS],
    pub updates: Vec<(usize, bool)>,
}

impl LoadBank for MockLoads {
    fn update(&mut self, id: usize, on: bool) -> bool {
        if id >= NUM_LOADS {
            return false;
        }
        self.updates.push((id, on));
        if self.fail_mask[id] {
            return false;
        }
        self.hw[id] = on;
        true
    }

    fn read_all(&mut self, out: &mut [bool; NUM_LOADS]) {
        *out = self.hw;
    }
}

/// Sample provider fed from a queue of prepared frames. Once the queue is
/// drained every read times out.
pub struct FrameProvider {
    frames: VecDeque<(Vec<u8>, FrameStatus)>,
    pub started: bool,
}

impl FrameProvider {
    pub fn with_frames(frames: &[(Vec<u8>, FrameStatus)]) -> Self {
        Self { frames: frames.iter().cloned().collect(), started: false }
    }
}

impl SampleProvider for FrameProvider {
    fn start(&mut self) {
        self.started = true;
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> (usize, FrameStatus) {
        match self.frames.pop_front() {
            Some((frame, status)) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                (n, status)
            }
            None => (0, FrameStatus::Timeout),
        }
    }
}

/// Pass-through calibration (raw count == millivolts), optionally failing
/// on one designated count.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinearCal {
    fail_at: Option<u16>,
}

impl LinearCal {
    pub fn failing_at(raw: u16) -> Self {
        Self { fail_at: Some(raw) }
    }
}

impl Calibrator for LinearCal {
    fn raw_to_mv(&self, raw: u16) -> Result<i16, CalibrationError> {
        if self.fail_at == Some(raw) {
            return Err(CalibrationError);
        }
        Ok(raw as i16)
    }
}

/// Encode one DMA sample record.
pub fn record(channel: u8, value: u16) -> [u8; RECORD_BYTES] {
    (((channel as u32) << 16) | value as u32).to_le_bytes()
}
