//! Telemetry payloads and fault-edge events.
//!
//! [TelemetryReport] is the periodic snapshot the broker channel publishes;
//! the field names are the wire names. [EventTracker] compares successive
//! fault sets and yields one [Event] per edge: a rising overcurrent or
//! voltage fault and the matching all-clear. The external channels frame
//! events however their wire format requires; the rising overcurrent edge
//! carries the lockout flag so a subscriber can tell a recoverable trip
//! from a terminal one.

use heapless::{String, Vec};
use serde::Serialize;

use crate::control::Mode;
use crate::hardware::design_parameters::NUM_LOADS;
use crate::state::{Fails, SysState};

/// Periodic telemetry snapshot, serialized as published.
#[derive(Debug, Copy, Clone, Serialize)]
pub struct TelemetryReport {
    #[serde(rename = "V")]
    pub vrms: f32,
    #[serde(rename = "I")]
    pub irms: f32,
    #[serde(rename = "P")]
    pub p: f32,
    #[serde(rename = "S")]
    pub s: f32,
    pub fp: f32,
    #[serde(rename = "E")]
    pub energy_kwh: f64,
    /// Load states as 0/1, indexed by load id.
    #[serde(rename = "L")]
    pub loads: [u8; NUM_LOADS],
    #[serde(rename = "FAIL_I")]
    pub fail_i: bool,
    #[serde(rename = "FAIL_I_NR")]
    pub fail_i_nr: bool,
    #[serde(rename = "FAIL_V")]
    pub fail_v: [bool; NUM_LOADS],
    #[serde(rename = "MODE")]
    pub mode: Mode,
}

impl TelemetryReport {
    pub fn new(state: &SysState, mode: Mode) -> Self {
        let mut loads = [0u8; NUM_LOADS];
        for (slot, on) in loads.iter_mut().zip(state.output.iter()) {
            *slot = *on as u8;
        }
        Self {
            vrms: state.measure.vrms,
            irms: state.measure.irms,
            p: state.measure.p,
            s: state.measure.s,
            fp: state.measure.fp,
            energy_kwh: state.energy_kwh,
            loads,
            fail_i: state.fails.fail_i,
            fail_i_nr: state.fails.fail_i_nr,
            fail_v: state.fails.fail_v,
            mode,
        }
    }

    /// Encode the report for the broker channel.
    pub fn to_json(
        &self,
    ) -> Result<String<512>, serde_json_core::ser::Error> {
        serde_json_core::to_string(self)
    }
}

/// A fault edge worth announcing.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Event {
    /// Overcurrent protection engaged. `repetitive` marks the lockout.
    FailI { repetitive: bool },
    /// Overcurrent protection released.
    FailIOk,
    /// Voltage envelope violated on a load.
    FailV { load: u8 },
    /// Voltage fault cleared on a load.
    FailVOk { load: u8 },
}

impl Event {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Event::FailI { .. } => "FAIL_I",
            Event::FailIOk => "FAIL_I_OK",
            Event::FailV { .. } => "FAIL_V",
            Event::FailVOk { .. } => "FAIL_V_OK",
        }
    }

    /// Load id for the per-load events.
    pub fn load(&self) -> Option<u8> {
        match self {
            Event::FailV { load } | Event::FailVOk { load } => Some(*load),
            _ => None,
        }
    }
}

/// Turns successive fault sets into edge events, one tracker per channel.
#[derive(Debug, Default)]
pub struct EventTracker {
    last: Fails,
}

impl EventTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events for every fault flag that changed since the last poll.
    ///
    /// At most one event per flag fits, so the vector never overflows.
    pub fn poll(&mut self, fails: &Fails) -> Vec<Event, { NUM_LOADS + 1 }> {
        let mut events = Vec::new();

        if fails.fail_i != self.last.fail_i {
            let event = if fails.fail_i {
                Event::FailI { repetitive: fails.fail_i_nr }
            } else {
                Event::FailIOk
            };
            events.push(event).ok();
        }

        for id in 0..NUM_LOADS {
            if fails.fail_v[id] != self.last.fail_v[id] {
                let event = if fails.fail_v[id] {
                    Event::FailV { load: id as u8 }
                } else {
                    Event::FailVOk { load: id as u8 }
                };
                events.push(event).ok();
            }
        }

        self.last = *fails;
        events
    }
}
