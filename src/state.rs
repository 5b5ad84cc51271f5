//! System snapshot, energy accounting and change detection.
//!
//! One [SharedState] instance holds the latest measurement, the load
//! outputs, the active faults and the accumulated energy behind a mutex.
//! Consumers only ever exchange it by value: [SharedState::get] hands out a
//! copy, and no reference to the guarded data crosses a task boundary.
//!
//! The accumulated energy persists automatically: every time it grows by
//! [SAVE_ENERGY_THS_KWH] since the last save, the state marks the save and
//! advances the watermark while holding the mutex, then writes flash only
//! after releasing it. A failed write is logged and implicitly retried at
//! the next threshold crossing, losing at most one window of accumulation.

use log::{info, warn};
use num_traits::Float;
use serde::{Deserialize, Serialize};
use spin::Mutex;

use crate::hardware::design_parameters::{
    NUM_LOADS, SAVE_ENERGY_THS_KWH, UPDATE_CURR_THS, UPDATE_ENERGY_THS,
    UPDATE_FP_THS, UPDATE_MIN_INTERVAL_MS, UPDATE_VOLT_THS,
};
use crate::hardware::{Clock, KvStore};
use crate::measure::Measure;

/// Active protections.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fails {
    /// Overcurrent protection engaged.
    pub fail_i: bool,
    /// Overcurrent lockout: recovery requires operator intervention.
    pub fail_i_nr: bool,
    /// Voltage envelope violated, per load.
    pub fail_v: [bool; NUM_LOADS],
}

/// Complete system snapshot.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysState {
    pub measure: Measure,
    pub output: [bool; NUM_LOADS],
    pub fails: Fails,
    /// Accumulated energy since the last reset [kWh]. Monotonically
    /// non-decreasing between resets.
    pub energy_kwh: f64,
}

struct Inner {
    state: SysState,
    last_saved_kwh: f64,
}

/// Mutex-guarded owner of the system snapshot.
pub struct SharedState {
    inner: Mutex<Inner>,
}

impl SharedState {
    /// Zeroed state with no persisted energy restored. Test and bring-up
    /// convenience; production init goes through [SharedState::init].
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SysState::default(),
                last_saved_kwh: 0.0,
            }),
        }
    }

    /// Create the state and restore the persisted energy total.
    pub fn init(kv: &mut impl KvStore) -> Self {
        let energy = kv.load_energy();
        Self {
            inner: Mutex::new(Inner {
                state: SysState { energy_kwh: energy, ..SysState::default() },
                last_saved_kwh: energy,
            }),
        }
    }

    /// Publish a window's results and accumulate its energy increment.
    ///
    /// Called from the acquisition task once per closed window. The flash
    /// write, when due, happens strictly after the mutex is released.
    pub fn update_measure(&self, m: &Measure, kv: &mut impl KvStore) {
        let save = {
            let mut inner = self.inner.lock();
            inner.state.measure = *m;
            inner.state.energy_kwh += m.e_inc as f64;

            if inner.state.energy_kwh - inner.last_saved_kwh
                >= SAVE_ENERGY_THS_KWH
            {
                inner.last_saved_kwh = inner.state.energy_kwh;
                Some(inner.last_saved_kwh)
            } else {
                None
            }
        };

        if let Some(kwh) = save {
            if kv.save_energy(kwh) {
                info!("energy autosaved: {} kWh", kwh);
            } else {
                // The watermark stays advanced; the retry rides the next
                // threshold crossing.
                warn!("energy autosave failed");
            }
        }
    }

    pub fn update_outputs(&self, outputs: &[bool; NUM_LOADS]) {
        self.inner.lock().state.output = *outputs;
    }

    pub fn update_fails(&self, fails: &Fails) {
        self.inner.lock().state.fails = *fails;
    }

    /// Atomic copy of the whole snapshot.
    pub fn get(&self) -> SysState {
        self.inner.lock().state
    }

    /// Zero the accumulated energy and persist the zero.
    pub fn reset_energy(&self, kv: &mut impl KvStore) {
        {
            let mut inner = self.inner.lock();
            inner.state.energy_kwh = 0.0;
            inner.last_saved_kwh = 0.0;
        }
        if !kv.save_energy(0.0) {
            warn!("energy reset could not be persisted");
        }
        info!("accumulated energy reset");
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Change thresholds for one outbound consumer.
#[derive(Debug, Copy, Clone)]
pub struct Thresholds {
    pub v_ths: f32,
    pub i_ths: f32,
    pub fp_ths: f32,
    pub e_ths: f32,
    /// Minimum spacing between emissions [ms].
    pub tmin_ms: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            v_ths: UPDATE_VOLT_THS,
            i_ths: UPDATE_CURR_THS,
            fp_ths: UPDATE_FP_THS,
            e_ths: UPDATE_ENERGY_THS,
            tmin_ms: UPDATE_MIN_INTERVAL_MS,
        }
    }
}

/// Decides when an outbound consumer should re-emit the state.
///
/// Each consumer owns one detector. `last_update_ms == 0` is the sentinel
/// for "never sent": the first [update](ChangeDetector::update) after init
/// returns true unconditionally so the stream gets primed.
#[derive(Debug, Default, Copy, Clone)]
pub struct ChangeDetector {
    last_sent: SysState,
    last_update_ms: u32,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `s` differs enough from the last sent state and the
    /// minimum interval has elapsed.
    pub fn update(
        &self,
        s: &SysState,
        ths: &Thresholds,
        clock: &impl Clock,
    ) -> bool {
        if self.last_update_ms == 0 {
            return true;
        }

        let dv = Float::abs(s.measure.vrms - self.last_sent.measure.vrms);
        let di = Float::abs(s.measure.irms - self.last_sent.measure.irms);
        let dp = Float::abs(
            Float::abs(s.measure.fp) - Float::abs(self.last_sent.measure.fp),
        );
        let de = Float::abs(s.energy_kwh - self.last_sent.energy_kwh);
        let value_change = di > ths.i_ths
            || dv > ths.v_ths
            || dp > ths.fp_ths
            || de > ths.e_ths as f64;

        let mut load_change = false;
        let mut fail_change = s.fails.fail_i != self.last_sent.fails.fail_i;
        for i in 0..NUM_LOADS {
            load_change |= s.output[i] != self.last_sent.output[i];
            fail_change |= s.fails.fail_v[i] != self.last_sent.fails.fail_v[i];
        }

        let enough_time = clock.now_ms().wrapping_sub(self.last_update_ms)
            >= ths.tmin_ms;

        (value_change || load_change || fail_change) && enough_time
    }

    /// Record `sent` as the state on the wire.
    pub fn mark_sent(&mut self, sent: &SysState, clock: &impl Clock) {
        self.last_sent = *sent;
        self.last_update_ms = clock.now_ms();
    }
}
