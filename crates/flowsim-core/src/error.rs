//! Core error types.

use crate::types::{DevicePortNumber, PacketTag};

/// Validation failures for declarative rule specifications.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpecError {
    #[error("action weight must be at least 1 (output port {output_port})")]
    ZeroWeight { output_port: DevicePortNumber },

    #[error("duplicate action for output port {output_port} and tag {tag:?}")]
    DuplicateAction {
        output_port: DevicePortNumber,
        tag: Option<PacketTag>,
    },
}
