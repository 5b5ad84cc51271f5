//! Protection state machines.
//!
//! Two disjoint FSM families run once per control tick: one global machine
//! watching the total RMS current, and one machine per load watching the RMS
//! voltage against that load's envelope. Each step returns the
//! outputs-enabled verdict for its scope; the controller ANDs the two
//! verdicts into the relay command.

use crate::hardware::design_parameters::{
    IMAX_HYST_PRC, MAX_FAIL_I, REC_I_TIME, REC_V_TIME, REPEAT_WINDOW,
    VRANGE_HYST_PRC,
};
use crate::settings::LoadCfg;
use crate::timer::Timer;

/// States of the global overcurrent machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GlobalState {
    /// Normal operation, loads enabled.
    Ok,
    /// Overcurrent present, everything disconnected.
    FailI,
    /// Current back in range, waiting out the recovery hold-off.
    Rec,
    /// Repeated trips inside the repeat window; locked out until a manual
    /// reset.
    ManRec,
}

/// Global overcurrent protection.
///
/// The trip signal latches with a 10 % hysteresis band: it rises when the
/// current exceeds `imax` and falls only below `imax * 0.9`, so a current
/// hovering at the limit cannot chatter the relays. A trip counter with a
/// sliding window distinguishes an isolated event (automatic recovery after
/// [REC_I_TIME]) from a persistent overload (lockout after [MAX_FAIL_I]
/// trips inside [REPEAT_WINDOW]).
#[derive(Debug)]
pub struct GlobalFsm {
    state: GlobalState,
    trip: bool,
    cont_fails: u8,
    fail: bool,
    repetitive: bool,
    t_rec: Timer,
    t_repeat: Timer,
}

impl GlobalFsm {
    pub const fn new() -> Self {
        Self {
            state: GlobalState::Ok,
            trip: false,
            cont_fails: 0,
            fail: false,
            repetitive: false,
            t_rec: Timer::new(),
            t_repeat: Timer::new(),
        }
    }

    /// Re-enter [GlobalState::Ok] and forget the trip history. This is the
    /// only exit from [GlobalState::ManRec].
    pub fn reset(&mut self) {
        self.state = GlobalState::Ok;
        self.cont_fails = 0;
        self.fail = false;
        self.repetitive = false;
    }

    /// Run one tick against the measured RMS current.
    ///
    /// Returns true iff loads may be energized.
    pub fn step(&mut self, i_rms: f32, imax: f32, now_ms: u32) -> bool {
        let clear_level = imax * (1.0 - IMAX_HYST_PRC / 100.0);
        if !self.trip && i_rms > imax {
            self.trip = true;
        } else if self.trip && i_rms < clear_level {
            self.trip = false;
        }

        match self.state {
            GlobalState::Ok => {
                let mut ret = true;
                if self.cont_fails != 0 && !self.t_repeat.is_active() {
                    self.t_repeat.start(now_ms, REPEAT_WINDOW);
                }
                if self.t_repeat.expired(now_ms) {
                    self.t_repeat.stop();
                    self.cont_fails = 0;
                }
                if self.trip {
                    self.state = GlobalState::FailI;
                    self.fail = true;
                    self.cont_fails += 1;
                    self.t_repeat.stop();
                    ret = false;
                }
                ret
            }

            GlobalState::FailI => {
                if !self.trip {
                    self.fail = false;
                    if self.cont_fails < MAX_FAIL_I {
                        self.state = GlobalState::Rec;
                        self.t_rec.start(now_ms, REC_I_TIME);
                    } else {
                        self.state = GlobalState::ManRec;
                        self.repetitive = true;
                    }
                }
                false
            }

            GlobalState::Rec => {
                self.fail = false;
                if self.trip {
                    self.t_rec.stop();
                    self.state = GlobalState::FailI;
                    self.cont_fails += 1;
                    self.fail = true;
                    false
                } else if self.t_rec.expired(now_ms) {
                    self.t_rec.stop();
                    self.state = GlobalState::Ok;
                    true
                } else {
                    false
                }
            }

            GlobalState::ManRec => {
                self.repetitive = true;
                self.cont_fails = 0;
                false
            }
        }
    }

    pub fn state(&self) -> GlobalState {
        self.state
    }

    /// Overcurrent currently latched.
    pub fn fail(&self) -> bool {
        self.fail
    }

    /// Locked out by repeated trips; recovery is manual only.
    pub fn repetitive(&self) -> bool {
        self.repetitive
    }
}

/// States of one load's voltage machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadState {
    On,
    Off,
    FailV,
}

/// Per-load voltage envelope protection.
///
/// The out-of-range predicate is asymmetric: while faulted, the envelope is
/// relaxed by [VRANGE_HYST_PRC] on the violated side, so the voltage must
/// travel past the relaxed bound before the fault clears. A bound of −1
/// disables that side entirely.
#[derive(Debug)]
pub struct LoadFsm {
    state: LoadState,
    v_fail: bool,
    t_rec: Timer,
}

impl LoadFsm {
    pub const fn new() -> Self {
        Self { state: LoadState::Off, v_fail: false, t_rec: Timer::new() }
    }

    /// Reinitialize from the load's current energization.
    pub fn reset(&mut self, energized: bool) {
        self.state = if energized { LoadState::On } else { LoadState::Off };
        self.t_rec.stop();
        self.v_fail = false;
    }

    fn out_of_range(&self, vrms: i16, cfg: &LoadCfg) -> bool {
        let (vmin, vmax) = (cfg.v_min, cfg.v_max);
        if self.v_fail {
            let vmin_hyst = (vmin as f32 * (1.0 - VRANGE_HYST_PRC / 100.0)) as i16;
            let vmax_hyst = (vmax as f32 * (1.0 + VRANGE_HYST_PRC / 100.0)) as i16;
            (vrms < vmin_hyst && vmin >= 0) || (vrms > vmax_hyst && vmax >= 0)
        } else {
            (vrms < vmin && vmin >= 0) || (vrms > vmax && vmax >= 0)
        }
    }

    /// Run one tick against the measured RMS voltage.
    ///
    /// Returns true iff this load may be energized.
    pub fn step(&mut self, vrms: i16, cfg: &LoadCfg, now_ms: u32) -> bool {
        let out = self.out_of_range(vrms, cfg);

        match self.state {
            LoadState::On => {
                self.v_fail = false;
                if out {
                    self.state = LoadState::FailV;
                    self.v_fail = true;
                    return false;
                }
                true
            }

            LoadState::Off => {
                self.v_fail = false;
                if out {
                    self.t_rec.stop();
                    self.state = LoadState::FailV;
                    self.v_fail = true;
                } else if cfg.auto_rec {
                    if !self.t_rec.is_active() {
                        self.t_rec.start(now_ms, REC_V_TIME);
                    } else if self.t_rec.expired(now_ms) {
                        self.t_rec.stop();
                        self.state = LoadState::On;
                        return true;
                    }
                }
                false
            }

            LoadState::FailV => {
                self.v_fail = true;
                if !out {
                    self.state = LoadState::Off;
                    if cfg.auto_rec {
                        self.t_rec.start(now_ms, REC_V_TIME);
                    }
                    self.v_fail = false;
                }
                false
            }
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Voltage fault currently latched for this load.
    pub fn v_fail(&self) -> bool {
        self.v_fail
    }
}
