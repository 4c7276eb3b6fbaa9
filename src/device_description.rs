//! The device-description catalog is an external collaborator: it maps
//! `(deviceType, firmwareVersion)` to the function/parameter/packet schema a
//! peer exposes. This module defines only the *shape* of that schema — the
//! narrow interface core code needs to build/parse packets and drive the
//! parameter store — not a real catalog of device data.

use std::collections::HashMap;

use crate::message::SubtypeMatch;

/// A parameter's scalar value. `config`/`value`/`link` paramsets are three
/// disjoint maps of these, keyed by `(channel, remote, name)`.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParameterValue {
    pub fn as_u64(&self) -> u64 {
        match self {
            ParameterValue::Bool(b) => {
                if *b {
                    1
                } else {
                    0
                }
            }
            ParameterValue::Int(i) => *i as u64,
            ParameterValue::Float(f) => *f as u64,
            ParameterValue::Str(_) => 0,
        }
    }

    /// "Toggle cast" — binary/integer/float toggle semantics: inverting a
    /// stored value for a COMMAND-type re-trigger.
    pub fn toggled(&self) -> ParameterValue {
        match self {
            ParameterValue::Bool(b) => ParameterValue::Bool(!b),
            ParameterValue::Int(i) => ParameterValue::Int(if *i == 0 { 1 } else { 0 }),
            ParameterValue::Float(f) => ParameterValue::Float(if *f == 0.0 { 1.0 } else { 0.0 }),
            ParameterValue::Str(s) => ParameterValue::Str(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOperationType {
    Store,
    Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamsetType {
    Config,
    Values,
    Link,
}

/// One named, per-channel parameter definition.
#[derive(Debug, Clone)]
pub struct RpcConfigurationParameter {
    pub id: String,
    pub op_type: ParamOperationType,
    pub readable: bool,
    pub writeable: bool,
    pub default: ParameterValue,
    /// `CONFIG` paramset byte grouping: which list id and byte index this
    /// parameter lives at, per config-write scenario.
    pub list_id: Option<u32>,
    pub byte_index: Option<u8>,
    pub bit_offset: u8,
    pub bit_size: u16,
}

/// Where a binary-payload byte's value comes from when building a set packet.
#[derive(Debug, Clone)]
pub enum BinaryPayloadSource {
    Constant(u64),
    Parameter {
        param_id: String,
        omit_if: Option<u64>,
        index2_offset: Option<u8>,
    },
}

#[derive(Debug, Clone)]
pub struct BinaryPayloadSpec {
    pub byte_index: u8,
    pub bit_offset: u8,
    pub bit_size: u16,
    pub source: BinaryPayloadSource,
}

/// Template for the packet a `set_value`/`put_paramset` call builds.
#[derive(Debug, Clone)]
pub struct SetPacketTemplate {
    pub message_type: u8,
    pub subtype: u8,
    pub subtype_index: Option<u8>,
    pub channel_index: Option<u8>,
    pub binary_payloads: Vec<BinaryPayloadSpec>,
    pub response_message_type: u8,
    pub response_subtype: SubtypeMatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    ToCentral,
    FromCentral,
}

/// Describes how to extract frame values from a *received* packet of a given
/// `message_type`, for `get_values_from_packet`.
#[derive(Debug, Clone)]
pub struct FrameDescriptor {
    pub direction: FrameDirection,
    pub fixed_subtype: SubtypeMatch,
    pub fixed_length: Option<u8>,
    pub fixed_channel: Option<i32>,
    pub channel_index: Option<u8>,
    pub fields: Vec<(String, BinaryPayloadSpec)>,
    pub lowbat_param: Option<String>,
}

/// The schema for one `(device_type, firmware)` pair.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescription {
    pub needs_time: bool,
    pub timeout_s: u64,
    pub set_packet_templates: HashMap<(i32, String), SetPacketTemplate>,
    pub frame_descriptors_by_type: HashMap<u8, Vec<FrameDescriptor>>,
    pub auto_reset: HashMap<String, Vec<String>>,
    /// `CONFIG`/`LINK` paramset schema, keyed by `(channel, name)` — the list
    /// id/byte index/bit layout `put_paramset` groups writes by.
    pub config_parameter_schema: HashMap<(i32, String), RpcConfigurationParameter>,
}

/// Narrow external collaborator: maps `(device_type, firmware)` to a schema.
pub trait DeviceDescriptionCatalog: Send + Sync {
    fn lookup(&self, device_type: u32, firmware: u16) -> Option<DeviceDescription>;
}

/// An in-memory catalog sufficient for tests and for small deployments that
/// hand-author their device descriptions instead of importing a vendor feed.
#[derive(Default)]
pub struct StaticCatalog {
    entries: HashMap<(u32, u16), DeviceDescription>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, device_type: u32, firmware: u16, description: DeviceDescription) {
        self.entries.insert((device_type, firmware), description);
    }
}

impl DeviceDescriptionCatalog for StaticCatalog {
    fn lookup(&self, device_type: u32, firmware: u16) -> Option<DeviceDescription> {
        self.entries.get(&(device_type, firmware)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_cast_semantics() {
        assert_eq!(
            ParameterValue::Bool(true).toggled(),
            ParameterValue::Bool(false)
        );
        assert_eq!(ParameterValue::Int(0).toggled(), ParameterValue::Int(1));
        assert_eq!(ParameterValue::Int(5).toggled(), ParameterValue::Int(0));
    }

    #[test]
    fn static_catalog_round_trip() {
        let mut cat = StaticCatalog::new();
        cat.insert(0x0102, 0x0010, DeviceDescription::default());
        assert!(cat.lookup(0x0102, 0x0010).is_some());
        assert!(cat.lookup(0x0102, 0x0011).is_none());
    }
}
