//! # gridwatch
//!
//! Core firmware for a single-phase AC power analyzer and programmable load
//! controller. The analyzer samples line voltage and current through a
//! DMA-backed converter stream, continuously computes RMS, active and
//! apparent power and accumulated energy, and runs two protection loops
//! that disconnect up to four relay-driven loads when the current or a
//! load's voltage leaves its configured envelope.
//!
//! ## Features
//! * 20 kHz interleaved V/I sampling with positional pair synchronization
//! * 10-cycle measurement windows: RMS, P, S, power factor, peaks, energy
//! * Global overcurrent FSM with hysteresis, timed recovery and
//!   repeat-fault lockout
//! * Per-load voltage envelope FSMs with asymmetric hysteresis and
//!   auto-reconnection
//! * Priority-ordered load shedding
//! * Mutex-guarded state snapshots with threshold-based energy persistence
//! * Change detection to pace every outbound channel
//!
//! ## Structure
//! The concrete board — converter DMA, relay drivers, flash, clock — stays
//! behind the contracts in [hardware]. [acquisition] turns DMA frames into
//! calibrated sample pairs, [measure] folds them into per-window results,
//! [state] owns the shared snapshot, and [control] runs the protection
//! fabric. [net] carries the payload types the outbound channels share.
//! Task creation and the channel transports are the integration's job; the
//! core only asks to have [Controller::tick](control::Controller::tick)
//! called once per control period and
//! [Acquisition::poll](acquisition::Acquisition::poll) in a loop of its
//! own.

#![cfg_attr(not(test), no_std)]

pub mod acquisition;
pub mod control;
pub mod hardware;
pub mod measure;
pub mod net;
pub mod settings;
pub mod state;
pub mod timer;

#[cfg(test)]
pub(crate) mod test_util;
