//! Builds a runnable network from a scenario.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use flowsim_core::{IpAddress, Packet, SimClock};
use flowsim_net::{Device, HoldQueue, Network, PassThroughPipe, TcpSourceConfig};

use crate::config::{
    parse_access_port, parse_device_port, parse_ip, ConfigError, GeneratorKind, SimConfig,
};

/// The source address control messages are stamped with during setup.
const CONTROLLER_IP: IpAddress = IpAddress::new(0);

/// A constructed scenario: the network plus the hold queues the driver
/// must settle every tick.
pub struct BuiltSim {
    pub network: Network,
    pub queues: Vec<Rc<RefCell<HoldQueue>>>,
}

/// Instantiates devices, links, rules, and generators.
///
/// Rules are installed through the control plane: each one rides an
/// add-or-update message delivered to its device.
pub fn build(config: &SimConfig, clock: SimClock) -> Result<BuiltSim, ConfigError> {
    let retx_period = Duration::from_millis(config.simulation.retx_scan_ms);
    let mut network = Network::new(retx_period, clock.clone());

    for entry in &config.devices {
        let device = Device::new(&entry.id, parse_ip(&entry.ip)?, clock.clone());
        device
            .borrow_mut()
            .set_die_on_fail_to_match(entry.die_on_fail_to_match);
        network.add_device(device);
    }
    info!(devices = config.devices.len(), "devices created");

    let mut queues = Vec::new();
    for entry in &config.links {
        for id in [&entry.src, &entry.dst] {
            if network.device(id).is_none() {
                return Err(ConfigError::UnknownDevice(id.clone()));
            }
        }
        let queue = HoldQueue::new(format!("queue_{}_{}", entry.src, entry.dst));
        let pipe = Rc::new(RefCell::new(PassThroughPipe::new(format!(
            "pipe_{}_{}",
            entry.src, entry.dst
        ))));
        network.add_link(
            queue.clone(),
            pipe,
            &entry.src,
            &entry.dst,
            parse_device_port(&entry.src_port)?,
            parse_device_port(&entry.dst_port)?,
            entry.internal,
        );
        queues.push(queue);
    }

    for entry in &config.rules {
        let device = network
            .device(&entry.device)
            .ok_or_else(|| ConfigError::UnknownDevice(entry.device.clone()))?;
        let spec = entry.to_rule_spec()?;
        let device_ip = device.borrow().ip_address();
        let message = Packet::new_add_or_update(CONTROLLER_IP, device_ip, spec, None);
        device.borrow_mut().handle_packet(message);
    }
    info!(rules = config.rules.len(), "rules installed");

    for entry in &config.generators {
        let device = network
            .device(&entry.device)
            .ok_or_else(|| ConfigError::UnknownDevice(entry.device.clone()))?;
        let dst_ip = parse_ip(&entry.dst_ip)?;
        let dst_port = parse_access_port(&entry.dst_port.to_string())?;
        let tuple = match entry.kind {
            GeneratorKind::Tcp => {
                let tcp_config = TcpSourceConfig {
                    mss_bytes: entry.mss_bytes,
                    ..TcpSourceConfig::default()
                };
                device
                    .borrow_mut()
                    .add_tcp_generator(tcp_config, dst_ip, dst_port)
            }
            GeneratorKind::Udp => {
                device
                    .borrow_mut()
                    .add_udp_generator(dst_ip, dst_port, entry.mss_bytes)
            }
        };
        device.borrow_mut().add_data(&tuple, entry.bytes);
    }

    Ok(BuiltSim { network, queues })
}
