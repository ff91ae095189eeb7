use crate::prelude::*;
use crate::growatt::command::NeoOutputPowerLimit;
use crate::growatt::device_config::{find_config_offset, DeviceConfig};
use crate::growatt::modbus::ModbusMessage;
use crate::utils::Utils;

/// Length words observed on device self-description frames. The uplink
/// carries no explicit discriminator, so the length word doubles as one.
const CONFIG_LENGTHS: [u16; 3] = [387, 340, 341];

/// Message types seen at offset 6 in replayed dumps.
const REPLAY_CONFIG_TYPE: u16 = 281;
const REPLAY_MODBUS_TYPES: [u16; 3] = [259, 260, 336];

/// A classified uplink frame, already descrambled and CRC-checked.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// TLV self-description block.
    Config(DeviceConfig),
    /// Register report or readback.
    ModbusReport(ModbusMessage),
    /// NEO output power limit report.
    OutputPowerLimit(NeoOutputPowerLimit),
    /// Recognized nothing; carries the would-be discriminator word.
    Unknown(u16),
}

impl Message {
    /// Classify a frame off the live broker. Tried most-specific first:
    /// the power-limit report checks its own marker, the modbus decoder
    /// validates its own length field, and the config block is keyed off
    /// the length word.
    pub fn parse(input: &[u8]) -> Self {
        if let Some(report) = NeoOutputPowerLimit::decode(input) {
            return Self::OutputPowerLimit(report);
        }

        match ModbusMessage::decode(input) {
            Ok(report) => return Self::ModbusReport(report),
            Err(err) => debug!("not a modbus report: {}", err),
        }

        let word = Utils::u16_be(input, 4);
        if CONFIG_LENGTHS.contains(&word) {
            return Self::Config(DeviceConfig::parse(input, find_config_offset(input)));
        }

        Self::Unknown(word)
    }

    /// Classify a frame from a recorded dump. Replays carry an explicit
    /// message type at offset 6 and a zeroed counter on config frames.
    pub fn parse_replay(input: &[u8]) -> Self {
        let counter = Utils::u16_be(input, 0);
        let msg_type = Utils::u16_be(input, 6);

        if counter == 0 && msg_type == REPLAY_CONFIG_TYPE {
            return Self::Config(DeviceConfig::parse(input, find_config_offset(input)));
        }

        if REPLAY_MODBUS_TYPES.contains(&msg_type) {
            match ModbusMessage::decode(input) {
                Ok(report) => return Self::ModbusReport(report),
                Err(err) => {
                    warn!("replay frame type {} failed to decode: {}", msg_type, err);
                    return Self::Unknown(msg_type);
                }
            }
        }

        Self::Unknown(msg_type)
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Config(config) => config.device_id(),
            Self::ModbusReport(report) => Some(&report.device_id),
            Self::OutputPowerLimit(report) => Some(&report.device_id),
            Self::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::growatt::command::MessageCommon;
    use crate::growatt::modbus::{ModbusBlock, ModbusFunction};

    fn modbus_frame() -> Vec<u8> {
        let report = ModbusMessage {
            counter: 9,
            device_id: "QMN000ABC1D2E3FG".to_string(),
            function: ModbusFunction::ReadHolding,
            metadata: None,
            blocks: vec![ModbusBlock::new(0, vec![0, 1, 0, 2])],
        };
        let mut frame = report.bytes();
        frame.extend_from_slice(&[0, 0]); // stand-in trailer
        frame
    }

    #[test]
    fn classifies_modbus_report() {
        match Message::parse(&modbus_frame()) {
            Message::ModbusReport(report) => {
                assert_eq!(report.device_id, "QMN000ABC1D2E3FG");
                assert_eq!(report.blocks.len(), 1);
            }
            other => panic!("got {:?}", other),
        }
    }

    #[test]
    fn classifies_power_limit_report() {
        let report = NeoOutputPowerLimit {
            device_id: "QMN000ABC1D2E3FG".to_string(),
            value: 600,
        };
        let mut frame = report.bytes();
        frame.extend_from_slice(&[0, 0]);
        assert_eq!(Message::parse(&frame), Message::OutputPowerLimit(report));
    }

    #[test]
    fn unknown_frame_keeps_discriminator() {
        let mut frame = vec![0u8; 48];
        frame[4..6].copy_from_slice(&1234u16.to_be_bytes());
        assert_eq!(Message::parse(&frame), Message::Unknown(1234));
    }

    #[test]
    fn replay_modbus_type_routes_to_decoder() {
        // address byte 1 plus function 3 reads as type 259 at offset 6
        let frame = modbus_frame();
        match Message::parse_replay(&frame) {
            Message::ModbusReport(report) => assert_eq!(report.counter, 9),
            other => panic!("got {:?}", other),
        }
    }

    #[test]
    fn replay_config_needs_zero_counter() {
        let mut frame = vec![0u8; 0x40];
        frame[6..8].copy_from_slice(&281u16.to_be_bytes());
        match Message::parse_replay(&frame) {
            Message::Config(config) => assert!(!config.params.is_empty()),
            other => panic!("got {:?}", other),
        }

        frame[0..2].copy_from_slice(&5u16.to_be_bytes());
        assert_eq!(Message::parse_replay(&frame), Message::Unknown(281));
    }
}
