//! Compact per-action counter timelines.
//!
//! Cumulative packet and byte counters are near-arithmetic under steady
//! traffic, so they are recorded as RLE strides; timestamps are
//! delta-packed. Memory stays proportional to the number of rate regimes,
//! not the number of samples.

use std::collections::BTreeMap;

use flowsim_core::sscp::ActionStats;
use flowsim_core::{EventQueueTime, MatchRuleKey};
use flowsim_seq::{PackedUintSeq, RleField, SeqError};

use crate::matcher::Matcher;

/// The recorded history of one action: sample times and cumulative
/// counters.
#[derive(Debug, Default)]
#[must_use]
pub struct ActionTimeline {
    times: PackedUintSeq,
    pkts: RleField<u64>,
    bytes: RleField<u64>,
}

impl ActionTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one sample. Sample times must not go backwards.
    pub fn record(&mut self, now: EventQueueTime, stats: &ActionStats) -> Result<(), SeqError> {
        self.times.append(now.as_nanos())?;
        self.pkts.append(stats.total_pkts_matched);
        self.bytes.append(stats.total_bytes_matched);
        Ok(())
    }

    /// Number of samples recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[must_use]
    pub fn times(&self) -> &PackedUintSeq {
        &self.times
    }

    #[must_use]
    pub fn pkts(&self) -> &RleField<u64> {
        &self.pkts
    }

    #[must_use]
    pub fn bytes(&self) -> &RleField<u64> {
        &self.bytes
    }

    /// A human-readable footprint summary.
    #[must_use]
    pub fn mem_string(&self) -> String {
        format!(
            "times [{}], pkts [{}], bytes [{}]",
            self.times.mem_string(),
            self.pkts.mem_string(),
            self.bytes.mem_string()
        )
    }
}

/// Timelines for every action of every rule in a matcher, keyed by
/// (rule key, action index).
#[derive(Debug, Default)]
#[must_use]
pub struct MatcherTimelines {
    by_action: BTreeMap<(MatchRuleKey, usize), ActionTimeline>,
}

impl MatcherTimelines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples every action of every rule the matcher currently owns.
    ///
    /// Rules that disappeared keep their recorded history; rules that
    /// appeared start a fresh timeline at the current sample.
    pub fn record(&mut self, now: EventQueueTime, matcher: &Matcher) -> Result<(), SeqError> {
        for rule in matcher.rules() {
            for (i, stats) in rule.stats(false).into_iter().enumerate() {
                self.by_action
                    .entry((rule.key().clone(), i))
                    .or_default()
                    .record(now, &stats)?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &MatchRuleKey, action_index: usize) -> Option<&ActionTimeline> {
        self.by_action.get(&(key.clone(), action_index))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_action.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_action.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(MatchRuleKey, usize), &ActionTimeline)> {
        self.by_action.iter()
    }
}
