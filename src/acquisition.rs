//! DMA frame intake and V/I pair synchronization.
//!
//! The converter interleaves the voltage and current channels in one DMA
//! stream, so pairing is positional: a current sample belongs to the voltage
//! sample immediately before it. A single pending-V flag tracks that
//! relationship. Any defect in a record — corrupt value, unknown channel
//! tag, failed calibration — drops the pair under construction and clears
//! the flag, which resynchronizes the stream on the next voltage sample.
//! Without the forced resync, one lost sample would swap the channel roles
//! for the rest of the session.
//!
//! Every error here is recoverable by discarding samples. The loop never
//! blocks beyond the provider's own read.

use log::warn;

use crate::hardware::design_parameters::FRAME_BYTES;
use crate::hardware::frame::{AdcSample, Channel, RECORD_BYTES};
use crate::hardware::{Calibrator, FrameStatus, SampleProvider};

pub struct Acquisition<P, C> {
    provider: P,
    calibrator: C,
    frame: [u8; FRAME_BYTES],
    pending_v: Option<i16>,
}

impl<P: SampleProvider, C: Calibrator> Acquisition<P, C> {
    pub fn new(provider: P, calibrator: C) -> Self {
        Self {
            provider,
            calibrator,
            frame: [0; FRAME_BYTES],
            pending_v: None,
        }
    }

    /// Begin continuous conversion on the provider.
    pub fn start(&mut self) {
        self.provider.start();
    }

    /// Read one frame and emit every calibrated (v_mv, i_mv) pair in it.
    ///
    /// The acquisition task calls this in a tight loop; `emit` feeds the
    /// measurement engine.
    pub fn poll(&mut self, mut emit: impl FnMut(i16, i16)) {
        let (len, status) = self.provider.read_frame(&mut self.frame);

        match status {
            FrameStatus::Ok => {}
            // Should not happen with an infinite provider deadline; ignore.
            FrameStatus::Timeout => return,
            FrameStatus::Overflow => {
                // Pairs were lost inside the DMA ring. The pending flag is
                // left alone: the next frame resumes with whichever channel
                // the converter delivers.
                warn!("sample stream overflow, data lost");
                return;
            }
        }

        // A partial record means the frame is corrupt; discard it whole.
        if len % RECORD_BYTES != 0 {
            return;
        }

        for record in self.frame[..len].chunks_exact(RECORD_BYTES) {
            let sample = match AdcSample::parse([
                record[0], record[1], record[2], record[3],
            ]) {
                Ok(sample) => sample,
                Err(_) => {
                    self.pending_v = None;
                    continue;
                }
            };

            let mv = match self.calibrator.raw_to_mv(sample.raw) {
                Ok(mv) => mv,
                Err(_) => {
                    self.pending_v = None;
                    continue;
                }
            };

            match sample.channel {
                Channel::Voltage => self.pending_v = Some(mv),
                Channel::Current => {
                    // A current sample with no voltage waiting is an
                    // orphan from a resync; drop it.
                    if let Some(v_mv) = self.pending_v.take() {
                        emit(v_mv, mv);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{record, FrameProvider, LinearCal};
    use std::vec::Vec;

    const V: u8 = 0;
    const I: u8 = 1;

    fn frame(records: &[[u8; 4]]) -> Vec<u8> {
        records.iter().flatten().copied().collect()
    }

    fn collect_pairs(
        acq: &mut Acquisition<FrameProvider, LinearCal>,
        polls: usize,
    ) -> Vec<(i16, i16)> {
        let mut pairs = Vec::new();
        for _ in 0..polls {
            acq.poll(|v, i| pairs.push((v, i)));
        }
        pairs
    }

    #[test]
    fn start_reaches_the_provider() {
        let provider = FrameProvider::with_frames(&[]);
        let mut acq = Acquisition::new(provider, LinearCal::default());
        acq.start();
        assert!(acq.provider.started);
    }

    #[test]
    fn pairs_interleaved_samples() {
        let provider = FrameProvider::with_frames(&[(
            frame(&[
                record(V, 100),
                record(I, 200),
                record(V, 300),
                record(I, 400),
            ]),
            FrameStatus::Ok,
        )]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 1), vec![(100, 200), (300, 400)]);
    }

    #[test]
    fn repeated_voltage_keeps_latest() {
        let provider = FrameProvider::with_frames(&[(
            frame(&[record(V, 10), record(V, 20), record(I, 30)]),
            FrameStatus::Ok,
        )]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 1), vec![(20, 30)]);
    }

    #[test]
    fn orphan_current_is_dropped() {
        let provider = FrameProvider::with_frames(&[(
            frame(&[record(I, 10), record(V, 20), record(I, 30)]),
            FrameStatus::Ok,
        )]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 1), vec![(20, 30)]);
    }

    #[test]
    fn corrupt_value_forces_resync() {
        // The out-of-range current sample voids the pending voltage; the
        // following current sample is an orphan and must not pair with it.
        let provider = FrameProvider::with_frames(&[(
            frame(&[
                record(V, 10),
                record(I, 5000),
                record(I, 30),
                record(V, 40),
                record(I, 50),
            ]),
            FrameStatus::Ok,
        )]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 1), vec![(40, 50)]);
    }

    #[test]
    fn unknown_channel_forces_resync() {
        let provider = FrameProvider::with_frames(&[(
            frame(&[record(V, 10), record(9, 20), record(I, 30)]),
            FrameStatus::Ok,
        )]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert!(collect_pairs(&mut acq, 1).is_empty());
    }

    #[test]
    fn calibration_failure_forces_resync() {
        let provider = FrameProvider::with_frames(&[(
            frame(&[record(V, 10), record(I, 999), record(I, 30)]),
            FrameStatus::Ok,
        )]);
        let mut acq =
            Acquisition::new(provider, LinearCal::failing_at(999));

        assert!(collect_pairs(&mut acq, 1).is_empty());
    }

    #[test]
    fn partial_record_drops_whole_frame() {
        let mut corrupt = frame(&[record(V, 10), record(I, 20)]);
        corrupt.push(0xAB);
        let provider = FrameProvider::with_frames(&[
            (corrupt, FrameStatus::Ok),
            (frame(&[record(V, 30), record(I, 40)]), FrameStatus::Ok),
        ]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 2), vec![(30, 40)]);
    }

    #[test]
    fn pending_voltage_survives_frame_boundaries() {
        let provider = FrameProvider::with_frames(&[
            (frame(&[record(V, 10)]), FrameStatus::Ok),
            (frame(&[record(I, 20)]), FrameStatus::Ok),
        ]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 2), vec![(10, 20)]);
    }

    #[test]
    fn overflow_and_timeout_preserve_state() {
        let provider = FrameProvider::with_frames(&[
            (frame(&[record(V, 10)]), FrameStatus::Ok),
            (Vec::new(), FrameStatus::Overflow),
            (Vec::new(), FrameStatus::Timeout),
            (frame(&[record(I, 20)]), FrameStatus::Ok),
        ]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        assert_eq!(collect_pairs(&mut acq, 4), vec![(10, 20)]);
    }

    #[test]
    fn stream_feeds_measurement_windows() {
        use crate::measure::MeasurementEngine;

        let mut records = Vec::new();
        for k in 0..8u16 {
            records.push(record(V, 1000 + k));
            records.push(record(I, 500 + k));
        }
        let provider = FrameProvider::with_frames(&[(
            frame(&records),
            FrameStatus::Ok,
        )]);
        let mut acq = Acquisition::new(provider, LinearCal::default());

        let mut engine = MeasurementEngine::<8>::new();
        let mut closes = 0;
        acq.poll(|v, i| {
            if engine.add_pair(v, i) {
                closes += 1;
            }
        });
        assert_eq!(closes, 1);
    }
}
