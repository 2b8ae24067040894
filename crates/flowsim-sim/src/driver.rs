//! The cooperative tick loop.
//!
//! One tick: drive every endpoint, settle the hold queues until no packet
//! moved, run the retransmit scan when due, and periodically sample
//! matcher timelines. The clock only advances between ticks.

use std::collections::BTreeMap;

use std::time::Duration;

use tracing::{info, warn};

use flowsim_core::{EventQueueTime, SimClock};
use flowsim_match::MatcherTimelines;
use flowsim_net::HoldQueue;

use crate::config::SimulationSection;
use crate::setup::BuiltSim;

/// Per-device timeline samples collected over a run.
pub type TimelinesByDevice = BTreeMap<String, MatcherTimelines>;

/// Runs the scenario to its configured duration; returns the collected
/// timelines.
pub fn run(sim: &mut BuiltSim, clock: &SimClock, section: &SimulationSection) -> TimelinesByDevice {
    let tick = Duration::from_millis(section.tick_ms);
    let end = EventQueueTime::from_duration(Duration::from_millis(section.duration_ms));

    let mut timelines = TimelinesByDevice::new();
    let mut ticks: u64 = 0;

    while clock.now() < end {
        sim.network.tick_all(clock.now());
        settle(&sim.queues);

        sim.network.scan_retransmits_if_due(clock.now());
        settle(&sim.queues);

        if section.sample_every_ticks != 0 && ticks % section.sample_every_ticks == 0 {
            sample(&sim.network, clock.now(), &mut timelines);
        }

        clock.advance(tick);
        ticks += 1;
    }

    report(sim, &timelines);
    timelines
}

/// Drains every hold queue until a full pass moves nothing.
fn settle(queues: &[std::rc::Rc<std::cell::RefCell<HoldQueue>>]) {
    loop {
        let moved: usize = queues.iter().map(HoldQueue::drain).sum();
        if moved == 0 {
            return;
        }
    }
}

fn sample(
    network: &flowsim_net::Network,
    now: EventQueueTime,
    timelines: &mut TimelinesByDevice,
) {
    for (id, device) in network.devices() {
        let entry = timelines.entry(id.clone()).or_default();
        if let Err(err) = entry.record(now, device.borrow().matcher()) {
            warn!(device = %id, %err, "timeline sample skipped");
        }
    }
}

fn report(sim: &BuiltSim, timelines: &TimelinesByDevice) {
    for (id, device) in sim.network.devices() {
        let device = device.borrow();
        let stats = device.stats();
        info!(
            device = %id,
            packets_seen = stats.packets_seen,
            bytes_seen = stats.bytes_seen,
            for_localhost = stats.packets_for_localhost,
            failed_to_match = stats.packets_failed_to_match,
            route_updates = stats.route_updates_seen,
            connections = device.num_connections(),
            rules = device.matcher().num_rules(),
            "device summary"
        );
    }
    for (device, device_timelines) in timelines {
        for ((key, action), timeline) in device_timelines.iter() {
            info!(
                device = %device,
                rule = %key,
                action,
                samples = timeline.len(),
                footprint = %timeline.mem_string(),
                "action timeline"
            );
        }
    }
}
