use crate::prelude::*;
use crate::growatt::modbus::ModbusMessage;
use crate::utils::Utils;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Device families speaking this protocol, each with its own register
/// catalog and framing quirks.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeviceFamily {
    Neo,
    Noah,
    Nexa,
}

impl DeviceFamily {
    /// Device ids carry a family-specific serial prefix.
    pub fn from_device_id(device_id: &str) -> Option<Self> {
        if device_id.starts_with("QMN") {
            Some(Self::Neo)
        } else if device_id.starts_with("0PVP") {
            Some(Self::Noah)
        } else if device_id.starts_with("0HVR") {
            Some(Self::Nexa)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Neo => "neo",
            Self::Noah => "noah",
            Self::Nexa => "nexa",
        }
    }
}

/// Where a logical value lives relative to a register block's start.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct RegisterPosition {
    pub register_no: u16,
    #[serde(default)]
    pub offset: u16,
    #[serde(default = "RegisterPosition::default_size")]
    pub size: u8,
}

impl RegisterPosition {
    fn default_size() -> u8 {
        2
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct FloatOptions {
    #[serde(default = "FloatOptions::default_multiplier")]
    pub multiplier: f64,
    #[serde(default)]
    pub delta: f64,
}

impl FloatOptions {
    fn default_multiplier() -> f64 {
        1.0
    }
}

impl Default for FloatOptions {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            delta: 0.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum EnumKind {
    #[serde(rename = "INT_MAP")]
    IntMap,
    #[serde(rename = "BITFIELD")]
    Bitfield,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EnumOptions {
    pub enum_type: EnumKind,
    // JSON object keys are strings; the internally tagged RegisterDataType
    // buffers its content, so serde_json's native string-to-int key
    // conversion doesn't apply and the keys must be parsed explicitly.
    #[serde(deserialize_with = "int_keyed_map")]
    pub values: HashMap<i64, String>,
}

fn int_keyed_map<'de, D>(deserializer: D) -> Result<HashMap<i64, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = HashMap::<String, String>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(k, v)| {
            k.parse::<i64>()
                .map(|k| (k, v))
                .map_err(serde::de::Error::custom)
        })
        .collect()
}

/// Decode rule for a register, loaded from the catalog and immutable
/// thereafter.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "data_type")]
pub enum RegisterDataType {
    #[serde(rename = "FLOAT")]
    Float {
        #[serde(default)]
        float_options: FloatOptions,
    },
    #[serde(rename = "INT")]
    Int,
    #[serde(rename = "TIME_HHMM")]
    TimeHhmm,
    #[serde(rename = "ENUM")]
    Enum { enum_options: EnumOptions },
    #[serde(rename = "STRING")]
    String,
}

/// A decoded register value as published downstream.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
        }
    }
}

impl RegisterDataType {
    /// Decode a raw register slice. `None` means "skip this field": the
    /// slice was empty or an unsupported width, or an enum code we do not
    /// know. It is never an error.
    pub fn decode(&self, raw: &[u8]) -> Option<Value> {
        if raw.is_empty() {
            return None;
        }

        match self {
            Self::String => Some(Value::Text(Utils::ascii_trimmed(raw))),
            Self::Float { float_options } => {
                let v = Utils::uint_be(raw)? as f64;
                Some(Value::Float(Utils::round(
                    v * float_options.multiplier + float_options.delta,
                    3,
                )))
            }
            Self::Int => Some(Value::Int(Utils::uint_be(raw)? as i64)),
            Self::TimeHhmm => {
                let v = Utils::uint_be(raw)? as i64;
                Some(Value::Int((v / 256) * 100 + v % 256))
            }
            Self::Enum { enum_options } => {
                let v = Utils::uint_be(raw)? as i64;
                match enum_options.enum_type {
                    // bit layouts aren't mapped yet, so there is nothing
                    // useful to publish for these
                    EnumKind::Bitfield => None,
                    // the symbolic label is display metadata only; the
                    // numeric code is what gets published
                    EnumKind::IntMap => enum_options.values.contains_key(&v).then_some(Value::Int(v)),
                }
            }
        }
    }
}

// HA display metadata {{{
//
// Carried through from the catalog to discovery payloads; the codec never
// interprets any of it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct InputEntity {
    pub name: String,
    pub publish: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct HoldingEntity {
    pub name: String,
    pub publish: bool,
    /// HA entity type: number, button or switch.
    pub r#type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}
// }}}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GrowattRegister {
    pub position: RegisterPosition,
    pub data: RegisterDataType,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InputRegister {
    pub growatt: GrowattRegister,
    pub homeassistant: InputEntity,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct HoldingRegister {
    /// Some holding entities are command-only and have no readable wire
    /// position.
    pub growatt: Option<GrowattRegister>,
    pub homeassistant: HoldingEntity,
}

/// One decoded register out of a modbus report.
#[derive(Clone, Debug, PartialEq)]
pub struct RegisterValue {
    pub register_no: u16,
    pub name: String,
    pub unit: Option<String>,
    pub value: Value,
}

/// Per-family register catalog. Loaded once at startup and shared
/// read-only; never mutated afterwards.
#[derive(Clone, Debug, Deserialize)]
pub struct RegisterCatalog {
    pub input_registers: HashMap<String, InputRegister>,
    pub holding_registers: HashMap<String, HoldingRegister>,
}

impl RegisterCatalog {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|err| anyhow!("parsing register catalog: {}", err))
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| anyhow!("reading register catalog {}: {}", path, err))?;
        Self::from_json(&content)
    }

    /// The catalogs shipped with the bridge.
    pub fn embedded(family: DeviceFamily) -> Result<Self> {
        let json = match family {
            DeviceFamily::Neo => include_str!("../../registers/neo.json"),
            DeviceFamily::Noah => include_str!("../../registers/noah.json"),
            DeviceFamily::Nexa => include_str!("../../registers/nexa.json"),
        };
        Self::from_json(json)
    }

    /// Decode every input register the catalog knows about out of a
    /// register report. Fields the message doesn't cover, or whose decode
    /// yields nothing, are skipped.
    pub fn decode_inputs(&self, message: &ModbusMessage) -> Vec<RegisterValue> {
        self.decode(message, self.input_registers.iter().map(|(name, reg)| {
            (
                name,
                &reg.growatt,
                reg.homeassistant.unit_of_measurement.as_ref(),
            )
        }))
    }

    /// Same as [`Self::decode_inputs`] for holding (settings) registers.
    pub fn decode_holdings(&self, message: &ModbusMessage) -> Vec<RegisterValue> {
        self.decode(
            message,
            self.holding_registers.iter().filter_map(|(name, reg)| {
                reg.growatt.as_ref().map(|growatt| {
                    (
                        name,
                        growatt,
                        reg.homeassistant.unit_of_measurement.as_ref(),
                    )
                })
            }),
        )
    }

    fn decode<'a>(
        &self,
        message: &ModbusMessage,
        registers: impl Iterator<Item = (&'a String, &'a GrowattRegister, Option<&'a String>)>,
    ) -> Vec<RegisterValue> {
        let mut values = Vec::new();

        for (name, growatt, unit) in registers {
            let raw = match message.get_data(&growatt.position) {
                Some(raw) => raw,
                None => continue,
            };
            if let Some(value) = growatt.data.decode(raw) {
                values.push(RegisterValue {
                    register_no: growatt.position.register_no,
                    name: name.clone(),
                    unit: unit.cloned(),
                    value,
                });
            }
        }

        values.sort_by_key(|v| v.register_no);
        values
    }

    /// Resolve a holding-register entity name to its wire position, used
    /// when turning an HA command back into a register write.
    pub fn holding_position(&self, name: &str) -> Option<&RegisterPosition> {
        self.holding_registers
            .get(name)
            .and_then(|reg| reg.growatt.as_ref())
            .map(|growatt| &growatt.position)
    }
}

/// All three family catalogs, loaded once and injected into the
/// coordinator.
#[derive(Clone, Debug)]
pub struct Catalogs {
    catalogs: HashMap<DeviceFamily, std::sync::Arc<RegisterCatalog>>,
}

impl Catalogs {
    pub fn load() -> Result<Self> {
        let mut catalogs = HashMap::new();
        for family in [DeviceFamily::Neo, DeviceFamily::Noah, DeviceFamily::Nexa] {
            catalogs.insert(
                family,
                std::sync::Arc::new(RegisterCatalog::embedded(family)?),
            );
        }
        Ok(Self { catalogs })
    }

    /// Load `<dir>/{neo,noah,nexa}.json` instead of the embedded catalogs.
    pub fn from_dir(dir: &str) -> Result<Self> {
        let mut catalogs = HashMap::new();
        for family in [DeviceFamily::Neo, DeviceFamily::Noah, DeviceFamily::Nexa] {
            let path = format!("{}/{}.json", dir, family.name());
            catalogs.insert(
                family,
                std::sync::Arc::new(RegisterCatalog::from_file(&path)?),
            );
        }
        Ok(Self { catalogs })
    }

    pub fn get(&self, family: DeviceFamily) -> std::sync::Arc<RegisterCatalog> {
        // load() populates every family, so this cannot miss
        self.catalogs[&family].clone()
    }

    /// Catalog for the family a device id's prefix selects.
    pub fn for_device_id(&self, device_id: &str) -> Option<std::sync::Arc<RegisterCatalog>> {
        DeviceFamily::from_device_id(device_id).map(|family| self.get(family))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_type(multiplier: f64, delta: f64) -> RegisterDataType {
        RegisterDataType::Float {
            float_options: FloatOptions { multiplier, delta },
        }
    }

    fn enum_type(kind: EnumKind, codes: &[(i64, &str)]) -> RegisterDataType {
        RegisterDataType::Enum {
            enum_options: EnumOptions {
                enum_type: kind,
                values: codes.iter().map(|(k, v)| (*k, v.to_string())).collect(),
            },
        }
    }

    #[test]
    fn decode_empty_is_none() {
        assert_eq!(float_type(0.1, 0.0).decode(&[]), None);
        assert_eq!(RegisterDataType::String.decode(&[]), None);
    }

    #[test]
    fn decode_unsupported_width_is_none() {
        assert_eq!(RegisterDataType::Int.decode(&[1, 2, 3]), None);
    }

    #[test]
    fn decode_float_scales_and_rounds() {
        assert_eq!(
            float_type(0.1, 0.0).decode(&[0x00, 0xfa]),
            Some(Value::Float(25.0))
        );
        assert_eq!(
            float_type(0.001, 0.0).decode(&[0x00, 0x07]),
            Some(Value::Float(0.007))
        );
        assert_eq!(
            float_type(1.0, -40.0).decode(&[0x00, 0x64]),
            Some(Value::Float(60.0))
        );
    }

    #[test]
    fn decode_enum_int_map() {
        let t = enum_type(EnumKind::IntMap, &[(0, "Waiting"), (1, "Normal")]);
        // known code decodes to the numeric value, not the label
        assert_eq!(t.decode(&[0x00, 0x01]), Some(Value::Int(1)));
        // unknown code is silently skipped
        assert_eq!(t.decode(&[0x00, 0x63]), None);
    }

    #[test]
    fn decode_enum_bitfield_unsupported() {
        let t = enum_type(EnumKind::Bitfield, &[(1, "eps_en")]);
        assert_eq!(t.decode(&[0x00, 0x01]), None);
    }

    #[test]
    fn decode_string_trims_nuls() {
        assert_eq!(
            RegisterDataType::String.decode(b"AH1.0\x00\x00\x00"),
            Some(Value::Text("AH1.0".to_string()))
        );
    }

    #[test]
    fn decode_time_hhmm() {
        // 0x0A1E = 10:30
        assert_eq!(
            RegisterDataType::TimeHhmm.decode(&[0x0a, 0x1e]),
            Some(Value::Int(1030))
        );
    }

    #[test]
    fn family_from_prefix() {
        assert_eq!(
            DeviceFamily::from_device_id("QMN000ABC1D2E3FG"),
            Some(DeviceFamily::Neo)
        );
        assert_eq!(
            DeviceFamily::from_device_id("0PVP50AB12345678"),
            Some(DeviceFamily::Noah)
        );
        assert_eq!(
            DeviceFamily::from_device_id("0HVR00AB12345678"),
            Some(DeviceFamily::Nexa)
        );
        assert_eq!(DeviceFamily::from_device_id("XYZ12345"), None);
    }

    #[test]
    fn embedded_catalogs_deserialize() {
        for family in [DeviceFamily::Neo, DeviceFamily::Noah, DeviceFamily::Nexa] {
            let catalog = RegisterCatalog::embedded(family).unwrap();
            assert!(
                !catalog.input_registers.is_empty(),
                "{} has no input registers",
                family.name()
            );
            assert!(
                !catalog.holding_registers.is_empty(),
                "{} has no holding registers",
                family.name()
            );
        }
    }
}
