use crate::prelude::*;
use crate::growatt::modbus::ModbusFunction;
use crate::utils::Utils;

use enum_dispatch::*;
use std::convert::TryFrom;

/// Single-register command frames are a fixed 42 bytes.
pub const SINGLE_FRAME_LEN: usize = 42;

/// msg_len field of a single-register frame; the multiple-register
/// variant adds its value bytes on top.
const BASE_MSG_LEN: u16 = 36;

/// Constant second header word on every command frame.
const CONSTANT_7: u16 = 7;

/// Marker word used by the NEO fixed-layout messages. The same wire type
/// has been seen with 2 here and a zero value; those are not valid
/// reports.
const NEO_MARKER: u16 = 3;

const NEO_TYPE_READ_REPORT: u16 = 261;
const NEO_TYPE_SET: u16 = 262;
const NOAH_TYPE_SMART_POWER: u16 = 0x0110;

#[enum_dispatch]
pub trait MessageCommon {
    fn device_id(&self) -> &str;
    /// Cleartext frame, before scrambling and CRC.
    fn bytes(&self) -> Vec<u8>;
}

/// Everything the bridge can send towards a device.
#[enum_dispatch(MessageCommon)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    ReadSingleRegister,
    PresetSingleRegister,
    PresetMultipleRegister,
    NeoSetOutputPowerLimit,
    NeoReadOutputPowerLimit,
    NoahSmartPower,
}

impl Command {
    /// Parse a cleartext command frame back into its variant. Build and
    /// parse are byte-exact inverses.
    ///
    /// The fixed-layout messages are structurally modbus frames aimed at
    /// well-known registers (the type word is the address byte plus the
    /// function code), so those are tried first and anything that misses
    /// their markers falls back to the generic decoder.
    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < SINGLE_FRAME_LEN {
            bail!("command frame too short: {} bytes", input.len());
        }
        if Utils::u16_be(input, 2) != CONSTANT_7 {
            bail!("bad command frame header");
        }

        match Utils::u16_be(input, 6) {
            NEO_TYPE_SET => {
                if let Some(command) = NeoSetOutputPowerLimit::matches(input) {
                    return Ok(Self::NeoSetOutputPowerLimit(command));
                }
            }
            NEO_TYPE_READ_REPORT => {
                if let Some(command) = NeoReadOutputPowerLimit::matches(input) {
                    return Ok(Self::NeoReadOutputPowerLimit(command));
                }
            }
            NOAH_TYPE_SMART_POWER => {
                if let Some(command) = NoahSmartPower::matches(input) {
                    return Ok(Self::NoahSmartPower(command));
                }
            }
            _ => {}
        }

        Self::decode_modbus(input)
    }

    fn decode_modbus(input: &[u8]) -> Result<Self> {
        if input[6] != 1 {
            bail!("unexpected device address {}", input[6]);
        }
        let function = ModbusFunction::try_from(input[7])
            .map_err(|_| anyhow!("unknown command function {}", input[7]))?;
        let device_id = Utils::ascii_trimmed(&input[8..38]);

        match function {
            ModbusFunction::PresetMultiple => {
                let start = Utils::u16_be(input, 38);
                let end = Utils::u16_be(input, 40);
                if end < start {
                    bail!("multi-register command end {} before start {}", end, start);
                }
                let len = (end - start + 1) as usize * 2;
                let values = input
                    .get(42..42 + len)
                    .ok_or_else(|| anyhow!("multi-register command truncated"))?
                    .to_vec();
                Ok(Self::PresetMultipleRegister(PresetMultipleRegister {
                    device_id,
                    start,
                    end,
                    values,
                }))
            }
            ModbusFunction::PresetSingle => Ok(Self::PresetSingleRegister(PresetSingleRegister {
                device_id,
                register: Utils::u16_be(input, 38),
                value: Utils::u16_be(input, 40),
            })),
            _ => Ok(Self::ReadSingleRegister(ReadSingleRegister {
                device_id,
                function,
                register: Utils::u16_be(input, 38),
            })),
        }
    }
}

/// Shared builder for the fixed 42-byte single-register layout.
fn single_register_frame(device_id: &str, function: ModbusFunction, register: u16, value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(SINGLE_FRAME_LEN);
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&CONSTANT_7.to_be_bytes());
    out.extend_from_slice(&BASE_MSG_LEN.to_be_bytes());
    out.push(1);
    out.push(function.into());
    out.extend_from_slice(&Utils::padded_ascii(device_id, 30));
    out.extend_from_slice(&register.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
    out
}

/// NEO fixed-layout header: counter 1, constant 7, msg_len, msg_type,
/// 16-byte device id, 14 bytes of padding.
fn neo_frame_header(device_id: &str, msg_len: u16, msg_type: u16) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&CONSTANT_7.to_be_bytes());
    out.extend_from_slice(&msg_len.to_be_bytes());
    out.extend_from_slice(&msg_type.to_be_bytes());
    out.extend_from_slice(&Utils::padded_ascii(device_id, 16));
    out.extend_from_slice(&[0; 14]);
    out
}

// ReadSingleRegister {{{
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadSingleRegister {
    pub device_id: String,
    pub function: ModbusFunction,
    pub register: u16,
}

impl ReadSingleRegister {
    pub fn new(device_id: &str, register: u16) -> Self {
        Self {
            device_id: device_id.to_string(),
            function: ModbusFunction::ReadSingle,
            register,
        }
    }
}

impl MessageCommon for ReadSingleRegister {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        // the register is repeated in the value slot on reads
        single_register_frame(&self.device_id, self.function, self.register, self.register)
    }
} // }}}

// PresetSingleRegister {{{
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresetSingleRegister {
    pub device_id: String,
    pub register: u16,
    pub value: u16,
}

impl PresetSingleRegister {
    pub fn new(device_id: &str, register: u16, value: u16) -> Self {
        Self {
            device_id: device_id.to_string(),
            register,
            value,
        }
    }
}

impl MessageCommon for PresetSingleRegister {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        single_register_frame(
            &self.device_id,
            ModbusFunction::PresetSingle,
            self.register,
            self.value,
        )
    }
} // }}}

// PresetMultipleRegister {{{
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PresetMultipleRegister {
    pub device_id: String,
    pub start: u16,
    pub end: u16,
    pub values: Vec<u8>,
}

impl MessageCommon for PresetMultipleRegister {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&CONSTANT_7.to_be_bytes());
        out.extend_from_slice(&(BASE_MSG_LEN + self.values.len() as u16).to_be_bytes());
        out.push(1);
        out.push(ModbusFunction::PresetMultiple.into());
        out.extend_from_slice(&Utils::padded_ascii(&self.device_id, 30));
        out.extend_from_slice(&self.start.to_be_bytes());
        out.extend_from_slice(&self.end.to_be_bytes());
        out.extend_from_slice(&self.values);
        out
    }
} // }}}

// NeoSetOutputPowerLimit {{{
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NeoSetOutputPowerLimit {
    pub device_id: String,
    pub value: u16,
}

impl NeoSetOutputPowerLimit {
    fn matches(input: &[u8]) -> Option<Self> {
        if Utils::u16_be(input, 4) != BASE_MSG_LEN || Utils::u16_be(input, 38) != NEO_MARKER {
            return None;
        }
        Some(Self {
            device_id: Utils::ascii_trimmed(&input[8..24]),
            value: Utils::u16_be(input, 40),
        })
    }
}

impl MessageCommon for NeoSetOutputPowerLimit {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = neo_frame_header(&self.device_id, BASE_MSG_LEN, NEO_TYPE_SET);
        out.extend_from_slice(&NEO_MARKER.to_be_bytes());
        out.extend_from_slice(&self.value.to_be_bytes());
        out
    }
} // }}}

// NeoReadOutputPowerLimit {{{
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NeoReadOutputPowerLimit {
    pub device_id: String,
}

impl NeoReadOutputPowerLimit {
    pub fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
        }
    }

    fn matches(input: &[u8]) -> Option<Self> {
        if Utils::u16_be(input, 4) != BASE_MSG_LEN
            || Utils::u16_be(input, 38) != NEO_MARKER
            || Utils::u16_be(input, 40) != NEO_MARKER
        {
            return None;
        }
        Some(Self {
            device_id: Utils::ascii_trimmed(&input[8..24]),
        })
    }
}

impl MessageCommon for NeoReadOutputPowerLimit {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = neo_frame_header(&self.device_id, BASE_MSG_LEN, NEO_TYPE_READ_REPORT);
        out.extend_from_slice(&NEO_MARKER.to_be_bytes());
        out.extend_from_slice(&NEO_MARKER.to_be_bytes());
        out
    }
} // }}}

// NeoOutputPowerLimit {{{

/// Report published by a NEO inverter carrying the currently active output
/// power limit. Not a command; parsed off the uplink.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NeoOutputPowerLimit {
    pub device_id: String,
    pub value: u16,
}

impl NeoOutputPowerLimit {
    /// Returns `None` when the frame reuses this wire type but isn't a
    /// live report (wrong length word, or marker other than 3).
    pub fn decode(input: &[u8]) -> Option<Self> {
        if input.len() < 44 {
            return None;
        }
        if Utils::u16_be(input, 4) != 38 || Utils::u16_be(input, 6) != NEO_TYPE_READ_REPORT {
            return None;
        }
        if Utils::u16_be(input, 40) != NEO_MARKER {
            return None;
        }

        Some(Self {
            device_id: Utils::ascii_trimmed(&input[8..24]),
            value: Utils::u16_be(input, 42),
        })
    }
}

impl MessageCommon for NeoOutputPowerLimit {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = neo_frame_header(&self.device_id, 38, NEO_TYPE_READ_REPORT);
        out.extend_from_slice(&NEO_MARKER.to_be_bytes());
        out.extend_from_slice(&NEO_MARKER.to_be_bytes());
        out.extend_from_slice(&self.value.to_be_bytes());
        out
    }
} // }}}

// NoahSmartPower {{{

/// Smart-power adjustment for NOAH batteries. A positive `power_diff`
/// raises output, a negative one lowers it; the wire format carries the
/// two directions in separate fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NoahSmartPower {
    pub device_id: String,
    pub power_diff: i32,
}

impl NoahSmartPower {
    const MARKER: [u8; 4] = [0x01, 0x36, 0x01, 0x38];

    fn matches(input: &[u8]) -> Option<Self> {
        if input.len() < 48 || input[38..42] != Self::MARKER {
            return None;
        }

        let set_down = Utils::u16_be(input, 42) as i32;
        let set_up = Utils::u16_be(input, 44) as i32;
        Some(Self {
            device_id: Utils::ascii_trimmed(&input[8..24]),
            power_diff: if set_up > 0 { set_up } else { -set_down },
        })
    }
}

impl MessageCommon for NoahSmartPower {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn bytes(&self) -> Vec<u8> {
        let (set_up, set_down) = if self.power_diff > 0 {
            (self.power_diff as u16, 0)
        } else {
            (0, (-self.power_diff) as u16)
        };

        let mut out = neo_frame_header(&self.device_id, 42, NOAH_TYPE_SMART_POWER);
        out.extend_from_slice(&Self::MARKER);
        out.extend_from_slice(&set_down.to_be_bytes());
        out.extend_from_slice(&set_up.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out
    }
} // }}}
