//! Outbound channel support.
//!
//! The broker client, the serial console and the wire framing live outside
//! the core; what they share is in here: the telemetry payload built from a
//! state snapshot, and the edge detector that turns fault transitions into
//! discrete events. Consumers pace themselves with a
//! [ChangeDetector](crate::state::ChangeDetector) so an idle line does not
//! generate traffic.

pub mod telemetry;

pub use telemetry::{Event, EventTracker, TelemetryReport};
