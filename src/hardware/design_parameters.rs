//! Dimensioned constants of the analyzer.
//!
//! Several of these are mathematically coupled: the sampling rate fixes the
//! number of pairs per line cycle, and the window length fixes both the
//! measurement latency and the energy increment per window. Change one and
//! the derived values follow.

use fugit::MillisDurationU32;

/// Number of relay-driven loads the controller manages.
pub const NUM_LOADS: usize = 4;

/// ADC sampling rate for each channel pair [Hz].
pub const SAMPLE_FREQ_HZ: u32 = 20_000;

/// Fundamental frequency of the line being measured [Hz].
pub const LINE_FREQ_HZ: u32 = 50;

/// Synchronized (V, I) pairs per line cycle.
pub const PAIRS_PER_CYCLE: usize = (SAMPLE_FREQ_HZ / LINE_FREQ_HZ) as usize;

/// Line cycles accumulated per measurement window.
pub const CYCLES_PER_WINDOW: usize = 10;

/// Total pairs per measurement window (200 ms at the default rates).
pub const SAMPLES_PER_WINDOW: usize = PAIRS_PER_CYCLE * CYCLES_PER_WINDOW;

/// Size of one DMA frame delivered by the sample provider [bytes].
pub const FRAME_BYTES: usize = 1024;

/// Largest value a healthy 12-bit conversion can produce.
pub const ADC_MAX: u16 = 4095;

/// Current sensor sensitivity [V/A].
///
/// ACS712-5A hall sensor, 185 mV/A nominal, output centered on the mid-rail.
pub const I_SENS: f64 = 0.185;

/// Voltage divider gain [V/V]. Negative: the divider inverts the phase.
pub const VOLT_GAIN: f64 = -4.05e-3;

/// RMS magnitudes at or below these floors are forced to zero so that an
/// unconnected input reads as 0 rather than amplified converter noise.
pub const V_GROUND_NOISE: f64 = 114.0;
pub const I_GROUND_NOISE: f64 = 0.15;

/// Fixed subtraction applied to Irms after the RMS computation, zeroing the
/// current sensor's resting offset.
pub const I_OFFSET: f64 = 0.05;

/// Period of the control task.
pub const CONTROL_PERIOD: MillisDurationU32 = MillisDurationU32::from_ticks(10);

/// Hold-off before reconnecting loads after an overcurrent trip. Long enough
/// for inductive loads to de-energize and line transients to settle.
pub const REC_I_TIME: MillisDurationU32 = MillisDurationU32::from_ticks(5000);

/// Hold-off before reconnecting a load after its voltage re-enters range.
/// Shorter than [REC_I_TIME]; also limits relay cycling.
pub const REC_V_TIME: MillisDurationU32 = MillisDurationU32::from_ticks(3000);

/// Memory window for repeated overcurrent trips. Two trips inside this
/// window lock the system out until a manual reset; trips further apart are
/// treated as independent.
pub const REPEAT_WINDOW: MillisDurationU32 = MillisDurationU32::from_ticks(10_000);

/// Overcurrent hysteresis band [%]: trip at `imax`, clear at `imax * 0.9`.
pub const IMAX_HYST_PRC: f32 = 10.0;

/// Voltage envelope hysteresis band [%]. Tighter than the current band since
/// the line voltage varies less.
pub const VRANGE_HYST_PRC: f32 = 5.0;

/// Consecutive overcurrent trips inside [REPEAT_WINDOW] that trigger the
/// manual-reset lockout. Values below 2 would trip on ordinary inrush.
pub const MAX_FAIL_I: u8 = 2;

/// Default maximum RMS current [A]. Bounded by the sensor range.
pub const DEFAULT_IMAX: f32 = 5.0;

/// Default per-load voltage envelope [V]. −1 disables a bound.
pub const DEFAULT_VMIN: i16 = 200;
pub const DEFAULT_VMAX: i16 = 250;

/// Loads reconnect automatically after a voltage fault clears by default.
pub const DEFAULT_AUTO_REC: bool = true;

/// Accumulated-energy delta that triggers an automatic flash save [kWh].
pub const SAVE_ENERGY_THS_KWH: f64 = 1.0;

/// Change-detection default thresholds for the outbound channels: a consumer
/// re-emits when any measured quantity moves by more than its threshold, or
/// any output/fault flag changes, but never more often than the minimum
/// interval.
pub const UPDATE_VOLT_THS: f32 = 2.0;
pub const UPDATE_CURR_THS: f32 = 0.2;
pub const UPDATE_FP_THS: f32 = 0.02;
pub const UPDATE_ENERGY_THS: f32 = 0.1;
pub const UPDATE_MIN_INTERVAL_MS: u32 = 500;
