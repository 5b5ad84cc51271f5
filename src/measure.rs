//! Windowed RMS, power and energy estimation.
//!
//! Calibrated (V, I) pairs accumulate into a fixed window of `N` samples —
//! by default ten full line cycles, 200 ms at 20 kHz / 50 Hz. When the
//! window closes the engine computes the DC components, removes them, scales
//! through the sensor gains and derives RMS voltage and current, active and
//! apparent power, power factor, signal peaks and the energy increment the
//! window represents.
//!
//! Accumulation runs in f64 and results are cast to f32 once per window.
//! Both channels carry a noise floor: an RMS magnitude at or below the floor
//! is forced to zero together with the active power, so open inputs read as
//! silence instead of amplified converter noise.
//!
//! The window buffers are owned exclusively by this engine; the sample
//! stream is the single writer and reader, so no locking is involved.

use num_traits::Float;
use serde::{Deserialize, Serialize};

use crate::hardware::design_parameters::{
    I_GROUND_NOISE, I_OFFSET, I_SENS, SAMPLES_PER_WINDOW, SAMPLE_FREQ_HZ,
    V_GROUND_NOISE, VOLT_GAIN,
};

/// Results of one closed measurement window.
///
/// `vdc`/`idc` are the raw DC components at the converter pin, kept for
/// diagnostics. `e_inc` is the energy increment of this window alone; the
/// running total lives in the system state.
#[derive(Debug, Default, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub vrms: f32,
    pub vdc: f32,
    pub vpk: f32,
    pub irms: f32,
    pub idc: f32,
    pub ipk: f32,
    pub p: f32,
    pub s: f32,
    pub fp: f32,
    pub e_inc: f32,
}

pub struct MeasurementEngine<const N: usize = SAMPLES_PER_WINDOW> {
    v_buf: [i16; N],
    i_buf: [i16; N],
    index: usize,
    last: Measure,
}

impl<const N: usize> Default for MeasurementEngine<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> MeasurementEngine<N> {
    pub fn new() -> Self {
        Self {
            v_buf: [0; N],
            i_buf: [0; N],
            index: 0,
            last: Measure::default(),
        }
    }

    /// Append a calibrated pair to the current window.
    ///
    /// Returns true exactly when the pair completes the window; the results
    /// are computed at that point and the index wraps to zero.
    pub fn add_pair(&mut self, v_mv: i16, i_mv: i16) -> bool {
        self.v_buf[self.index] = v_mv;
        self.i_buf[self.index] = i_mv;
        self.index += 1;

        if self.index >= N {
            self.index = 0;
            self.last = self.compute();
            return true;
        }
        false
    }

    /// Results of the last closed window, stable until the next close.
    pub fn results(&self) -> Measure {
        self.last
    }

    /// Duration of one window in hours.
    fn window_hours() -> f64 {
        N as f64 / SAMPLE_FREQ_HZ as f64 / 3600.0
    }

    fn compute(&self) -> Measure {
        let n = N as f64;

        let mut sum_v = 0.0;
        let mut sum_i = 0.0;
        for k in 0..N {
            sum_v += self.v_buf[k] as f64;
            sum_i += self.i_buf[k] as f64;
        }
        let v_dc = sum_v / n;
        let i_dc = sum_i / n;

        let mut v_pk = 0.0;
        let mut i_pk = 0.0;
        let mut sum_v2 = 0.0;
        let mut sum_i2 = 0.0;
        let mut sum_p = 0.0;
        for k in 0..N {
            let v_ac = (self.v_buf[k] as f64 - v_dc) / 1000.0 / VOLT_GAIN;
            let i_ac = (self.i_buf[k] as f64 - i_dc) / 1000.0 / I_SENS;

            if v_ac > v_pk {
                v_pk = v_ac;
            }
            if i_ac > i_pk {
                i_pk = i_ac;
            }

            sum_v2 += v_ac * v_ac;
            sum_i2 += i_ac * i_ac;
            sum_p += v_ac * i_ac;
        }

        let mut vrms = Float::sqrt(sum_v2 / n);
        let mut irms = Float::sqrt(sum_i2 / n);
        let mut p = sum_p / n;

        if vrms <= V_GROUND_NOISE {
            vrms = 0.0;
            p = 0.0;
        }
        if irms <= I_GROUND_NOISE {
            irms = 0.0;
            p = 0.0;
        }

        let s = vrms * irms;
        let fp = if s > 1e-6 { Float::abs(p) / s } else { 0.0 };

        // Subtract the sensor's resting offset once, post-RMS.
        let irms = if irms <= I_OFFSET { 0.0 } else { irms - I_OFFSET };

        Measure {
            vrms: vrms as f32,
            vdc: (v_dc / 1000.0) as f32,
            vpk: v_pk as f32,
            irms: irms as f32,
            idc: (i_dc / 1000.0) as f32,
            ipk: i_pk as f32,
            p: p as f32,
            s: s as f32,
            fp: fp as f32,
            e_inc: (p * Self::window_hours()) as f32,
        }
    }
}
