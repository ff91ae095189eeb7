use crate::utils::Utils;

use serde::Serialize;

/// Longest TLV value we'll accept; anything larger marks the end of the
/// block.
const MAX_VALUE_LEN: u16 = 512;

/// Earliest offset at which the TLV block has been observed. The preamble
/// before it is variable-length and carries no length field, hence the
/// heuristic scan in [`find_config_offset`].
const SCAN_START: usize = 0x1c;

/// Known TLV parameter ids. Everything else is reported as `param_<id>`.
fn param_name(key_id: u16) -> Option<&'static str> {
    let name = match key_id {
        4 => "data_interval",
        5 => "unknown_5",
        6 => "unknown_6",
        7 => "password",
        8 => "serial_number",
        9 => "protocol_version",
        10 => "unknown_10",
        11 => "unknown_11",
        12 => "dns_address",
        13 => "device_type",
        14 => "local_ip",
        15 => "unknown_port",
        16 => "mac_address",
        17 => "remote_ip",
        18 => "remote_port",
        19 => "remote_url",
        20 => "model_id",
        21 => "sw_version",
        22 => "hw_version",
        23 => "unknown_23",
        24 => "unknown_24",
        25 => "subnet_mask",
        26 => "default_gateway",
        27 => "unknown_27",
        28 => "unknown_28",
        29 => "unknown_29",
        30 => "timezone",
        31 => "datetime",
        76 => "wifi_signal",
        _ => return None,
    };
    Some(name)
}

/// One parsed TLV parameter. `key_id` is absent for the `raw` fallback
/// entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConfigParam {
    #[serde(skip)]
    pub key_id: Option<u16>,
    pub name: String,
    pub value: String,
}

/// Device self-description sent as a TLV block, in wire order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceConfig {
    pub params: Vec<ConfigParam>,
}

impl DeviceConfig {
    /// Parse a TLV block starting at `offset`. Each entry is a big-endian
    /// `key_id:u16, key_len:u16` pair followed by `key_len` value bytes;
    /// a zero or implausible length terminates the block. If nothing
    /// parses, the whole remaining buffer lands hex-encoded in a `raw`
    /// entry, so the result is never empty.
    pub fn parse(data: &[u8], mut offset: usize) -> Self {
        let raw_hex = Utils::hex(data.get(offset..).unwrap_or_default());
        let mut params = Vec::new();

        while offset + 4 <= data.len() {
            let key_id = Utils::u16_be(data, offset);
            let key_len = Utils::u16_be(data, offset + 2);
            offset += 4;

            if key_len == 0 || key_len > MAX_VALUE_LEN || offset + key_len as usize > data.len() {
                break;
            }

            let raw_val = &data[offset..offset + key_len as usize];
            offset += key_len as usize;

            // NUL padding is trimmed before the printability check, but an
            // interior NUL makes the whole value binary. An all-NUL value
            // trims to the empty string.
            let trimmed = {
                let start = raw_val.iter().position(|&b| b != 0).unwrap_or(raw_val.len());
                let end = raw_val.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
                &raw_val[start.min(end)..end]
            };
            let value = if Utils::is_printable_ascii(trimmed) {
                String::from_utf8_lossy(trimmed).into_owned()
            } else {
                Utils::hex(raw_val)
            };

            let name = param_name(key_id)
                .map(str::to_string)
                .unwrap_or_else(|| format!("param_{}", key_id));

            params.push(ConfigParam {
                key_id: Some(key_id),
                name,
                value,
            });
        }

        if params.is_empty() {
            params.push(ConfigParam {
                key_id: None,
                name: "raw".to_string(),
                value: raw_hex,
            });
        }

        Self { params }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// The device's own serial number, when the config carried one.
    pub fn device_id(&self) -> Option<&str> {
        self.get("serial_number")
    }

    /// JSON object of name -> value, in wire order.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for param in &self.params {
            map.insert(
                param.name.clone(),
                serde_json::Value::String(param.value.clone()),
            );
        }
        serde_json::Value::Object(map)
    }
}

/// Heuristically locate the start of the TLV block: the first position at
/// or after 0x1C where a big-endian (key, length) pair looks plausible.
/// Falls back to 0x1C when the scan finds nothing.
pub fn find_config_offset(data: &[u8]) -> usize {
    if data.len() > SCAN_START + 4 {
        for i in SCAN_START..data.len() - 4 {
            let key = Utils::u16_be(data, i);
            let length = Utils::u16_be(data, i + 2);
            if (1..1000).contains(&key) && (1..256).contains(&length) {
                return i;
            }
        }
    }
    SCAN_START
}
