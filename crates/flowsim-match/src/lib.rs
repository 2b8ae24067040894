//! Match-action classification for the flowsim forwarding plane.
//!
//! A [`Matcher`] owns a set of [`MatchRule`]s indexed by a fixed-depth
//! wildcard tree. Packets are classified by (input port, tag, five-tuple)
//! and dispatched to weighted [`MatchRuleAction`]s; per-action counters
//! feed stats replies and compact timelines.

pub mod action;
pub mod flow_counter;
pub mod matcher;
pub mod rule;
pub mod timeline;
pub mod tree;

pub use action::MatchRuleAction;
pub use flow_counter::FlowCounter;
pub use matcher::{ForwardingDecision, Matcher};
pub use rule::MatchRule;
pub use timeline::{ActionTimeline, MatcherTimelines};
pub use tree::{MatchTree, RuleId};
