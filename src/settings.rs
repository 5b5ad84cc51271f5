//! Run-time configuration of the protection system.

use serde::{Deserialize, Serialize};

use crate::hardware::design_parameters::{
    DEFAULT_AUTO_REC, DEFAULT_IMAX, DEFAULT_VMAX, DEFAULT_VMIN, NUM_LOADS,
};

/// Protection policy for one load.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadCfg {
    /// Minimum admissible RMS voltage [V]. −1 disables the bound.
    pub v_min: i16,
    /// Maximum admissible RMS voltage [V]. −1 disables the bound.
    pub v_max: i16,
    /// Reconnect automatically once a voltage fault clears.
    pub auto_rec: bool,
    /// Disconnection priority. 0 is shed last; ties break on load id.
    pub priority: u8,
}

/// Complete protection configuration, persisted as a unit.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysCfg {
    /// Maximum admissible total RMS current [A].
    pub imax: f32,
    pub load: [LoadCfg; NUM_LOADS],
}

impl Default for SysCfg {
    fn default() -> Self {
        let mut load = [LoadCfg {
            v_min: DEFAULT_VMIN,
            v_max: DEFAULT_VMAX,
            auto_rec: DEFAULT_AUTO_REC,
            priority: 0,
        }; NUM_LOADS];
        for (id, cfg) in load.iter_mut().enumerate() {
            cfg.priority = id as u8;
        }
        Self { imax: DEFAULT_IMAX, load }
    }
}

/// A voltage envelope is acceptable when either bound is disabled or the
/// ordering `v_max > v_min` holds.
pub fn vrange_valid(v_min: i16, v_max: i16) -> bool {
    v_min < 0 || v_max < 0 || v_max > v_min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_assign_identity_priorities() {
        let cfg = SysCfg::default();
        assert_eq!(cfg.imax, DEFAULT_IMAX);
        for (id, load) in cfg.load.iter().enumerate() {
            assert_eq!(load.priority, id as u8);
            assert_eq!(load.v_min, DEFAULT_VMIN);
            assert_eq!(load.v_max, DEFAULT_VMAX);
            assert!(load.auto_rec);
        }
    }

    #[test]
    fn disabled_bounds_are_always_valid() {
        assert!(vrange_valid(-1, 100));
        assert!(vrange_valid(100, -1));
        assert!(vrange_valid(-1, -1));
        assert!(vrange_valid(200, 250));
        assert!(!vrange_valid(250, 200));
        assert!(!vrange_valid(200, 200));
    }
}
