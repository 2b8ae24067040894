//! TOML scenario configuration.

use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use flowsim_core::sscp::{ActionSpec, RuleSpec};
use flowsim_core::{
    AccessLayerPort, DevicePortNumber, FiveTuple, IpAddress, IpProto, MatchRuleKey, PacketTag,
};

/// Failures loading or interpreting a scenario file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("bad address {0:?}")]
    BadAddress(String),

    #[error("bad field value {0:?}")]
    BadField(String),

    #[error("unknown device {0:?}")]
    UnknownDevice(String),

    #[error("invalid rule: {0}")]
    InvalidRule(#[from] flowsim_core::SpecError),
}

/// Top-level scenario loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub simulation: SimulationSection,
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub generators: Vec<GeneratorEntry>,
}

impl SimConfig {
    /// Load a scenario from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse a scenario from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

/// The `[simulation]` section.
#[derive(Debug, Deserialize)]
pub struct SimulationSection {
    /// Total simulated time.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,
    /// Endpoint drive interval.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// TCP retransmit scan period.
    #[serde(default = "default_retx_scan_ms")]
    pub retx_scan_ms: u64,
    /// Record matcher timelines every N ticks. 0 disables.
    #[serde(default = "default_sample_every_ticks")]
    pub sample_every_ticks: u64,
}

fn default_duration_ms() -> u64 {
    1_000
}

fn default_tick_ms() -> u64 {
    10
}

fn default_retx_scan_ms() -> u64 {
    50
}

fn default_sample_every_ticks() -> u64 {
    10
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            duration_ms: default_duration_ms(),
            tick_ms: default_tick_ms(),
            retx_scan_ms: default_retx_scan_ms(),
            sample_every_ticks: default_sample_every_ticks(),
        }
    }
}

/// A `[[devices]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceEntry {
    pub id: String,
    pub ip: String,
    #[serde(default)]
    pub die_on_fail_to_match: bool,
}

/// A `[[links]]` entry: one unidirectional link.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkEntry {
    pub src: String,
    pub dst: String,
    pub src_port: String,
    pub dst_port: String,
    #[serde(default)]
    pub internal: bool,
}

/// A `[[rules]]` entry. Fields accept `"*"` for the wildcard sentinel.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub device: String,
    #[serde(default = "wild")]
    pub input_port: String,
    #[serde(default = "zero")]
    pub tag: String,
    #[serde(default)]
    pub tuples: Vec<TuplePattern>,
    #[serde(default)]
    pub actions: Vec<ActionEntry>,
}

fn wild() -> String {
    "*".to_string()
}

fn zero() -> String {
    "0".to_string()
}

/// A wildcardable five-tuple pattern.
#[derive(Debug, Clone, Deserialize)]
pub struct TuplePattern {
    #[serde(default = "wild")]
    pub src: String,
    #[serde(default = "wild")]
    pub dst: String,
    #[serde(default = "wild")]
    pub proto: String,
    #[serde(default = "wild")]
    pub src_port: String,
    #[serde(default = "wild")]
    pub dst_port: String,
}

/// One weighted action of a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionEntry {
    pub output_port: u32,
    #[serde(default = "default_weight")]
    pub weight: u32,
    pub tag: Option<u32>,
    #[serde(default)]
    pub preferential_drop: bool,
    pub flow_counter_n: Option<u64>,
}

fn default_weight() -> u32 {
    1
}

/// A `[[generators]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorEntry {
    pub device: String,
    pub kind: GeneratorKind,
    pub dst_ip: String,
    pub dst_port: u16,
    /// Application bytes queued at start.
    #[serde(default = "default_gen_bytes")]
    pub bytes: u64,
    #[serde(default = "default_mss")]
    pub mss_bytes: u32,
}

fn default_gen_bytes() -> u64 {
    1_000_000
}

fn default_mss() -> u32 {
    1500
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Tcp,
    Udp,
}

/// Parses an IPv4 address, or `"*"` for the wildcard.
pub fn parse_ip(s: &str) -> Result<IpAddress, ConfigError> {
    if s == "*" {
        return Ok(IpAddress::WILDCARD);
    }
    Ipv4Addr::from_str(s)
        .map(IpAddress::from)
        .map_err(|_| ConfigError::BadAddress(s.to_string()))
}

/// Parses a device port number, or `"*"` for the wildcard.
pub fn parse_device_port(s: &str) -> Result<DevicePortNumber, ConfigError> {
    if s == "*" {
        return Ok(DevicePortNumber::WILDCARD);
    }
    s.parse::<u32>()
        .map(DevicePortNumber::new)
        .map_err(|_| ConfigError::BadField(s.to_string()))
}

/// Parses a transport port, or `"*"` for the wildcard.
pub fn parse_access_port(s: &str) -> Result<AccessLayerPort, ConfigError> {
    if s == "*" {
        return Ok(AccessLayerPort::WILDCARD);
    }
    s.parse::<u16>()
        .map(AccessLayerPort::new)
        .map_err(|_| ConfigError::BadField(s.to_string()))
}

/// Parses a protocol (`"tcp"`, `"udp"`, a number, or `"*"`).
pub fn parse_proto(s: &str) -> Result<IpProto, ConfigError> {
    match s {
        "*" => Ok(IpProto::WILDCARD),
        "tcp" => Ok(IpProto::TCP),
        "udp" => Ok(IpProto::UDP),
        other => other
            .parse::<u8>()
            .map(IpProto::new)
            .map_err(|_| ConfigError::BadField(s.to_string())),
    }
}

/// Parses a packet tag, or `"*"` for the wildcard.
pub fn parse_tag(s: &str) -> Result<PacketTag, ConfigError> {
    if s == "*" {
        return Ok(PacketTag::WILDCARD);
    }
    s.parse::<u32>()
        .map(PacketTag::new)
        .map_err(|_| ConfigError::BadField(s.to_string()))
}

impl TuplePattern {
    pub fn to_tuple(&self) -> Result<FiveTuple, ConfigError> {
        Ok(FiveTuple::new(
            parse_ip(&self.src)?,
            parse_ip(&self.dst)?,
            parse_proto(&self.proto)?,
            parse_access_port(&self.src_port)?,
            parse_access_port(&self.dst_port)?,
        ))
    }
}

impl RuleEntry {
    /// The declarative rule this entry describes, validated.
    pub fn to_rule_spec(&self) -> Result<RuleSpec, ConfigError> {
        let tuples = self
            .tuples
            .iter()
            .map(TuplePattern::to_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        let key = MatchRuleKey::new(
            parse_device_port(&self.input_port)?,
            parse_tag(&self.tag)?,
            tuples,
        );

        let actions = self
            .actions
            .iter()
            .map(|a| ActionSpec {
                output_port: DevicePortNumber::new(a.output_port),
                tag: a.tag.map(PacketTag::new),
                weight: a.weight,
                preferential_drop: a.preferential_drop,
                flow_counter_n: a.flow_counter_n,
            })
            .collect();

        let spec = RuleSpec::new(key, actions);
        spec.validate()?;
        Ok(spec)
    }
}
