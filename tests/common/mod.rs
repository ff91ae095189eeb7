use growatt_bridge::prelude::*;
use growatt_bridge::growatt::frame;
use growatt_bridge::growatt::modbus::{Metadata, ModbusBlock, ModbusFunction, ModbusMessage};
use growatt_bridge::mqtt::{ChannelData, Message};

pub const NEO_DEVICE: &str = "QMN000ABC1D2E3FG";
pub const NOAH_DEVICE: &str = "0PVP50AB12345678";
pub const NEXA_DEVICE: &str = "0HVR00AB12345678";

pub struct Factory;

impl Factory {
    pub fn config() -> ConfigWrapper {
        let config: Config = serde_yaml::from_str(
            r#"
mqtt:
  host: localhost
home_assistant:
  enabled: false
"#,
        )
        .unwrap();
        ConfigWrapper::from_config(config)
    }

    pub fn config_with_ha() -> ConfigWrapper {
        let config: Config = serde_yaml::from_str("mqtt:\n  host: localhost\n").unwrap();
        ConfigWrapper::from_config(config)
    }

    pub fn neo_input_report(blocks: Vec<ModbusBlock>) -> ModbusMessage {
        ModbusMessage {
            counter: 1,
            device_id: NEO_DEVICE.to_string(),
            function: ModbusFunction::ReadInput,
            metadata: Some(Metadata {
                device_sn: NEO_DEVICE.to_string(),
                timestamp: None,
            }),
            blocks,
        }
    }

    /// Frame as a device would publish it: cleartext scrambled, then the
    /// trailer appended over the scrambled bytes.
    pub fn on_wire(cleartext: &[u8]) -> Vec<u8> {
        frame::append_crc(&frame::scramble(cleartext))
    }

    pub fn uplink(device_id: &str, cleartext: &[u8]) -> ChannelData {
        ChannelData::Message(Message::new(
            format!("c/{}", device_id),
            Self::on_wire(cleartext),
        ))
    }

    pub fn command(device_id: &str, parts: &str, payload: &str) -> ChannelData {
        ChannelData::Message(Message::new(
            format!("growatt/cmd/{}/{}", device_id, parts),
            payload.as_bytes().to_vec(),
        ))
    }
}

/// Collect published messages until the channel would block.
pub async fn drain(
    receiver: &mut tokio::sync::broadcast::Receiver<ChannelData>,
) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Ok(Ok(data)) = tokio::time::timeout(
        std::time::Duration::from_millis(200),
        receiver.recv(),
    )
    .await
    {
        if let ChannelData::Message(message) = data {
            messages.push(message);
        }
    }
    messages
}

pub fn find<'a>(messages: &'a [Message], topic: &str) -> Option<&'a Message> {
    messages.iter().find(|m| m.topic == topic)
}
