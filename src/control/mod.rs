//! Load control and protection fabric.
//!
//! The [Controller] owns the protection configuration, the per-load relay
//! bookkeeping and both FSM families behind one mutex. Once per control
//! period the task runs [Controller::tick]: the global overcurrent machine
//! first, then every load's voltage machine in shed-priority order, driving
//! each relay to the AND of the two verdicts. Relay writes happen outside
//! the mutex so a slow GPIO expander cannot stall readers.
//!
//! In [Mode::Manual] the tick is idle: protections are disabled and the
//! relays answer only to operator commands.
//!
//! The two summary fault flags are read by the tick loop and the outbound
//! channels without the mutex. They are single-writer advisory bits, kept as
//! relaxed atomics.

use core::sync::atomic::{AtomicBool, Ordering};

use log::{error, warn};
use serde::{Deserialize, Serialize};
use spin::Mutex;

use crate::hardware::design_parameters::NUM_LOADS;
use crate::hardware::{Clock, KvStore, LoadBank};
use crate::settings::{vrange_valid, SysCfg};
use crate::state::{Fails, SharedState};

pub mod fsm;

use fsm::{GlobalFsm, LoadFsm};

/// Operating mode of the control task.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// FSM-driven control with protections active.
    Auto,
    /// Direct operator control; protections disabled.
    Manual,
}

struct ControlInner {
    mode: Mode,
    cfg: SysCfg,
    load_state: [bool; NUM_LOADS],
    /// Load ids sorted by (priority, id) ascending. Rebuilt whenever any
    /// priority changes.
    priority_index: [usize; NUM_LOADS],
    global: GlobalFsm,
    loads: [LoadFsm; NUM_LOADS],
}

impl ControlInner {
    fn rebuild_priority_index(&mut self) {
        let mut index = [0usize; NUM_LOADS];
        for (i, slot) in index.iter_mut().enumerate() {
            *slot = i;
        }
        // The id in the key makes the order total, so ties stay stable.
        index.sort_unstable_by_key(|&id| (self.cfg.load[id].priority, id));
        self.priority_index = index;
    }

    fn apply_defaults(&mut self) {
        self.mode = Mode::Auto;
        self.cfg = SysCfg::default();
        self.global.reset();
        for id in 0..NUM_LOADS {
            self.priority_index[id] = id;
            self.load_state[id] = false;
            self.loads[id].reset(false);
        }
    }
}

pub struct Controller {
    inner: Mutex<ControlInner>,
    imax_fail: AtomicBool,
    imax_repetitive: AtomicBool,
}

impl Controller {
    pub fn new() -> Self {
        const LOAD_FSM_INIT: LoadFsm = LoadFsm::new();
        let mut inner = ControlInner {
            mode: Mode::Auto,
            cfg: SysCfg::default(),
            load_state: [false; NUM_LOADS],
            priority_index: [0; NUM_LOADS],
            global: GlobalFsm::new(),
            loads: [LOAD_FSM_INIT; NUM_LOADS],
        };
        inner.rebuild_priority_index();

        Self {
            inner: Mutex::new(inner),
            imax_fail: AtomicBool::new(false),
            imax_repetitive: AtomicBool::new(false),
        }
    }

    /// Restore the default configuration and safe FSM states without
    /// touching persistent storage.
    pub fn reset(&self) {
        self.inner.lock().apply_defaults();
        self.imax_fail.store(false, Ordering::Relaxed);
        self.imax_repetitive.store(false, Ordering::Relaxed);
    }

    /// Clear the overcurrent lockout and trip history. This is the only way
    /// out of the manual-recovery state.
    pub fn reset_protection(&self) {
        self.inner.lock().global.reset();
        self.imax_fail.store(false, Ordering::Relaxed);
        self.imax_repetitive.store(false, Ordering::Relaxed);
    }

    pub fn mode(&self) -> Mode {
        self.inner.lock().mode
    }

    /// Switch operating mode.
    ///
    /// Entering AUTO from MANUAL reinitializes both FSM families from the
    /// present load states, so protections evaluate from a clean slate.
    pub fn set_mode(&self, mode: Mode) {
        let mut inner = self.inner.lock();
        if inner.mode == Mode::Manual && mode == Mode::Auto {
            inner.global.reset();
            for id in 0..NUM_LOADS {
                let energized = inner.load_state[id];
                inner.loads[id].reset(energized);
            }
        }
        inner.mode = mode;
    }

    /// Drive a load directly. Meant for MANUAL mode; in AUTO the FSMs will
    /// overwrite the state on the next tick.
    ///
    /// The hardware write comes first: the recorded state and the published
    /// outputs only change if the relay accepted the command.
    pub fn set_load_state(
        &self,
        id: usize,
        on: bool,
        loads: &mut impl LoadBank,
        state: &SharedState,
    ) -> bool {
        if id >= NUM_LOADS {
            return false;
        }
        if !loads.update(id, on) {
            error!("load {} rejected the manual update", id);
            return false;
        }

        let outputs = {
            let mut inner = self.inner.lock();
            inner.load_state[id] = on;
            inner.load_state
        };
        state.update_outputs(&outputs);
        true
    }

    /// Recorded (software) state of a load. May differ from the hardware
    /// after a failed relay write.
    pub fn load_state(&self, id: usize) -> Option<bool> {
        if id >= NUM_LOADS {
            return None;
        }
        Some(self.inner.lock().load_state[id])
    }

    /// Snapshot of the full configuration.
    pub fn cfg(&self) -> SysCfg {
        self.inner.lock().cfg
    }

    pub fn set_imax(&self, imax: f32) -> bool {
        if !imax.is_finite() || imax <= 0.0 {
            return false;
        }
        self.inner.lock().cfg.imax = imax;
        true
    }

    pub fn set_load_vmin(&self, id: usize, v_min: i16) -> bool {
        if id >= NUM_LOADS {
            return false;
        }
        let mut inner = self.inner.lock();
        if !vrange_valid(v_min, inner.cfg.load[id].v_max) {
            return false;
        }
        inner.cfg.load[id].v_min = v_min;
        true
    }

    pub fn set_load_vmax(&self, id: usize, v_max: i16) -> bool {
        if id >= NUM_LOADS {
            return false;
        }
        let mut inner = self.inner.lock();
        if !vrange_valid(inner.cfg.load[id].v_min, v_max) {
            return false;
        }
        inner.cfg.load[id].v_max = v_max;
        true
    }

    pub fn set_load_auto_rec(&self, id: usize, enabled: bool) -> bool {
        if id >= NUM_LOADS {
            return false;
        }
        self.inner.lock().cfg.load[id].auto_rec = enabled;
        true
    }

    pub fn set_load_priority(&self, id: usize, priority: u8) -> bool {
        if id >= NUM_LOADS {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.cfg.load[id].priority = priority;
        inner.rebuild_priority_index();
        true
    }

    pub fn v_min(&self, id: usize) -> Option<i16> {
        if id >= NUM_LOADS {
            return None;
        }
        Some(self.inner.lock().cfg.load[id].v_min)
    }

    pub fn v_max(&self, id: usize) -> Option<i16> {
        if id >= NUM_LOADS {
            return None;
        }
        Some(self.inner.lock().cfg.load[id].v_max)
    }

    /// Overcurrent protection currently engaged.
    pub fn imax_fail(&self) -> bool {
        self.imax_fail.load(Ordering::Relaxed)
    }

    /// Overcurrent lockout engaged; recovery is manual.
    pub fn imax_repetitive(&self) -> bool {
        self.imax_repetitive.load(Ordering::Relaxed)
    }

    /// Persist the current configuration.
    pub fn save_cfg(&self, kv: &mut impl KvStore) -> bool {
        let cfg = self.inner.lock().cfg;
        kv.save_cfg(&cfg)
    }

    /// Replace the configuration with the persisted one. On failure the
    /// current configuration stands.
    pub fn load_cfg(&self, kv: &mut impl KvStore) -> bool {
        let mut cfg = SysCfg::default();
        if !kv.load_cfg(&mut cfg) {
            return false;
        }
        let mut inner = self.inner.lock();
        inner.cfg = cfg;
        inner.rebuild_priority_index();
        true
    }

    /// Run one control period.
    ///
    /// AUTO mode only; in MANUAL the task is idle and the relays keep
    /// whatever the operator last commanded.
    pub fn tick(
        &self,
        state: &SharedState,
        loads: &mut impl LoadBank,
        clock: &impl Clock,
    ) {
        let snapshot = state.get();
        let vrms = snapshot.measure.vrms as i16;
        let irms = snapshot.measure.irms;
        let now = clock.now_ms();

        let (global_ok, priority, imax) = {
            let mut inner = self.inner.lock();
            if inner.mode != Mode::Auto {
                return;
            }
            let imax = inner.cfg.imax;
            let ok = inner.global.step(irms, imax, now);
            self.imax_fail.store(inner.global.fail(), Ordering::Relaxed);
            self.imax_repetitive
                .store(inner.global.repetitive(), Ordering::Relaxed);
            (ok, inner.priority_index, imax)
        };

        let mut fails = Fails::default();
        let mut outputs = [false; NUM_LOADS];

        let repetitive = self.imax_repetitive.load(Ordering::Relaxed);
        fails.fail_i = if repetitive {
            irms > imax
        } else {
            self.imax_fail.load(Ordering::Relaxed)
        };
        fails.fail_i_nr = repetitive;

        for id in priority {
            let (indiv_ok, v_fail) = {
                let mut inner = self.inner.lock();
                let cfg = inner.cfg.load[id];
                let ok = inner.loads[id].step(vrms, &cfg, now);
                (ok, inner.loads[id].v_fail())
            };

            let on = global_ok && indiv_ok;
            if !loads.update(id, on) {
                // Keep the previous recorded state; the write is retried on
                // the next tick. The fault still surfaces.
                error!("load {} rejected the relay update", id);
                let inner = self.inner.lock();
                outputs[id] = inner.load_state[id];
                fails.fail_v[id] = v_fail;
                continue;
            }

            let mut inner = self.inner.lock();
            inner.load_state[id] = on;
            outputs[id] = on;
            fails.fail_v[id] = v_fail;
        }

        state.update_fails(&fails);
        state.update_outputs(&outputs);
    }

    /// Compare the hardware-observed load states against the recorded ones,
    /// then rewrite the recorded state to the hardware.
    pub fn check_outputs_integrity(&self, loads: &mut impl LoadBank) {
        let mut hw = [false; NUM_LOADS];
        loads.read_all(&mut hw);
        let recorded = self.inner.lock().load_state;

        for id in 0..NUM_LOADS {
            if hw[id] != recorded[id] {
                warn!("load {} hardware state diverged", id);
            }
            if !loads.update(id, recorded[id]) {
                error!("load {} could not be resynchronized", id);
            }
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}
