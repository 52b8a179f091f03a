//! Sequence watermark for one notification stream.
//!
//! The watermark is the sequence id of the last item handed downstream. It
//! is used as the `unacked_from` of the next stream request. The server
//! replays inclusively from that point, so the item at the watermark arrives
//! again with the same sequence id. It is delivered a second time only if
//! its acknowledgment failed.

use bridge_types::SequenceId;

/// How a received sequence id relates to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Newer than anything seen; the watermark moved forward.
    Advanced,
    /// Equal to the watermark, which was never acknowledged.
    Replayed,
    /// Older than the watermark, or equal to an acknowledged one.
    Stale,
}

/// Highest sequence id seen on a stream. Never moves backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceWatermark {
    current: SequenceId,
    seen: bool,
    acked: bool,
}

impl SequenceWatermark {
    /// Create a watermark at zero (replay everything unacknowledged).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a watermark resuming from a known sequence id.
    pub fn starting_at(seq: SequenceId) -> Self {
        Self {
            current: seq,
            seen: true,
            acked: false,
        }
    }

    /// The sequence id to request the next stream from.
    pub fn unacked_from(&self) -> SequenceId {
        self.current
    }

    /// Record a received sequence id.
    pub fn observe(&mut self, seq: SequenceId) -> Observation {
        // A fresh watermark accepts zero as a new id.
        if !self.seen || seq > self.current {
            self.current = seq;
            self.seen = true;
            self.acked = false;
            Observation::Advanced
        } else if seq == self.current && !self.acked {
            Observation::Replayed
        } else {
            Observation::Stale
        }
    }

    /// Record that the item at the watermark was acknowledged.
    pub fn mark_acked(&mut self) {
        self.acked = true;
    }

    /// True if the item at the watermark was acknowledged.
    pub fn is_acked(&self) -> bool {
        self.acked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(n: u64) -> SequenceId {
        SequenceId::new(n)
    }

    #[test]
    fn starts_at_zero() {
        assert_eq!(SequenceWatermark::new().unacked_from(), seq(0));
    }

    #[test]
    fn advances_on_newer() {
        let mut w = SequenceWatermark::new();
        assert_eq!(w.observe(seq(3)), Observation::Advanced);
        assert_eq!(w.observe(seq(7)), Observation::Advanced);
        assert_eq!(w.unacked_from(), seq(7));
    }

    #[test]
    fn replay_of_current_is_reported() {
        let mut w = SequenceWatermark::starting_at(seq(5));
        assert_eq!(w.observe(seq(5)), Observation::Replayed);
        assert_eq!(w.unacked_from(), seq(5));
    }

    #[test]
    fn never_moves_backwards() {
        let mut w = SequenceWatermark::starting_at(seq(10));
        assert_eq!(w.observe(seq(4)), Observation::Stale);
        assert_eq!(w.unacked_from(), seq(10));
    }

    #[test]
    fn zero_on_fresh_watermark_is_new() {
        let mut w = SequenceWatermark::new();
        assert_eq!(w.observe(seq(0)), Observation::Advanced);
        assert_eq!(w.observe(seq(0)), Observation::Replayed);
    }

    #[test]
    fn acked_watermark_replay_is_stale() {
        let mut w = SequenceWatermark::new();
        assert_eq!(w.observe(seq(2)), Observation::Advanced);
        w.mark_acked();
        assert!(w.is_acked());
        assert_eq!(w.observe(seq(2)), Observation::Stale);
        assert_eq!(w.unacked_from(), seq(2));

        assert_eq!(w.observe(seq(3)), Observation::Advanced);
        assert!(!w.is_acked());
        assert_eq!(w.observe(seq(3)), Observation::Replayed);
    }

    #[test]
    fn acked_zero_is_not_redelivered() {
        let mut w = SequenceWatermark::new();
        assert_eq!(w.observe(seq(0)), Observation::Advanced);
        w.mark_acked();
        assert_eq!(w.observe(seq(0)), Observation::Stale);
    }
}
