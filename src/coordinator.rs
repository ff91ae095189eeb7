use crate::prelude::*;
use crate::growatt::command::{
    Command, MessageCommon, NeoReadOutputPowerLimit, NeoSetOutputPowerLimit, NoahSmartPower,
    PresetSingleRegister, ReadSingleRegister,
};
use crate::growatt::frame;
use crate::growatt::message::Message as WireMessage;
use crate::growatt::modbus::{ModbusFunction, ModbusMessage};
use crate::growatt::registers::{Catalogs, DeviceFamily, RegisterValue, Value};
use crate::mqtt::{ChannelData, Message};

use serde_json::json;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// NEO inverters emit garbage wattage readings at night; anything above
/// this is treated as corrupt and the whole report is dropped.
const MAX_PLAUSIBLE_POWER: f64 = 1_000_000.0;

// PacketStats {{{
#[derive(Default)]
pub struct PacketStats {
    frames_received: u64,
    config_messages: u64,
    modbus_reports: u64,
    power_limit_reports: u64,
    unknown_frames: u64,
    crc_errors: u64,
    decode_errors: u64,
    commands_sent: u64,
    // Last frame kind per device
    last_messages: std::collections::HashMap<String, String>,
}

impl PacketStats {
    pub fn print_summary(&self) {
        info!("Frame statistics:");
        info!("  Frames received: {}", self.frames_received);
        info!("    Config messages: {}", self.config_messages);
        info!("    Modbus reports: {}", self.modbus_reports);
        info!("    Power limit reports: {}", self.power_limit_reports);
        info!("    Unknown frames: {}", self.unknown_frames);
        info!("  CRC errors: {}", self.crc_errors);
        info!("  Decode errors: {}", self.decode_errors);
        info!("  Commands sent: {}", self.commands_sent);
        for (device, last) in &self.last_messages {
            info!("  Last message from {}: {}", device, last);
        }
    }

    fn saw(&mut self, device_id: &str, kind: &str) {
        self.last_messages
            .insert(device_id.to_string(), kind.to_string());
    }
} // }}}

/// Routes descrambled device frames to decoded MQTT state and plaintext
/// commands back to scrambled device frames.
#[derive(Clone)]
pub struct Coordinator {
    config: ConfigWrapper,
    channels: Channels,
    catalogs: Catalogs,
    pub shared_stats: Arc<Mutex<PacketStats>>,
    announced: Arc<Mutex<HashSet<String>>>,
}

impl Coordinator {
    pub fn new(config: ConfigWrapper, catalogs: Catalogs, channels: Channels) -> Self {
        Self {
            config,
            channels,
            catalogs,
            shared_stats: Arc::new(Mutex::new(PacketStats::default())),
            announced: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut receiver = self.channels.from_mqtt.subscribe();

        loop {
            match receiver.recv().await? {
                ChannelData::Shutdown => break,
                ChannelData::Message(message) => {
                    let result = if message.is_device_uplink() {
                        self.handle_frame(&message)
                    } else if message.is_command() {
                        self.handle_command(&message)
                    } else {
                        Ok(())
                    };

                    if let Err(err) = result {
                        self.shared_stats.lock().unwrap().decode_errors += 1;
                        warn!("{}: {}", message.topic, err);
                    }
                }
            }
        }

        info!("coordinator shutting down");
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.channels.from_mqtt.send(ChannelData::Shutdown);
    }

    // device -> state {{{
    fn handle_frame(&self, message: &Message) -> Result<()> {
        self.shared_stats.lock().unwrap().frames_received += 1;

        // the trailer is computed over the scrambled frame, so check it
        // before descrambling
        if !frame::verify_crc(&message.payload) {
            self.shared_stats.lock().unwrap().crc_errors += 1;
            if self.config.strict_crc() {
                bail!("dropping frame with bad crc");
            }
            warn!("bad crc on {}, decoding anyway", message.topic);
        }

        let cleartext = frame::descramble(&message.payload);

        let parsed = if self.config.replay_mode() {
            WireMessage::parse_replay(&cleartext)
        } else {
            WireMessage::parse(&cleartext)
        };

        match parsed {
            WireMessage::Config(config) => {
                self.shared_stats.lock().unwrap().config_messages += 1;
                // fall back to the topic when the TLV block had no serial
                let topic_id = message.topic.strip_prefix("c/").unwrap_or(&message.topic);
                let device_id = config.device_id().unwrap_or(topic_id).to_string();
                self.shared_stats.lock().unwrap().saw(&device_id, "config");

                self.publish(Message::retained(
                    format!("{}/{}/config", mqtt::STATE_PREFIX, device_id),
                    serde_json::to_vec(&config.to_json())?,
                ))?;
                // a fresh self-description means the device (re)connected,
                // so refresh discovery too
                self.announce(&device_id, true)?;
            }
            WireMessage::ModbusReport(report) => {
                self.shared_stats.lock().unwrap().modbus_reports += 1;
                self.shared_stats
                    .lock()
                    .unwrap()
                    .saw(&report.device_id, "modbus report");
                self.handle_report(&report)?;
            }
            WireMessage::OutputPowerLimit(report) => {
                self.shared_stats.lock().unwrap().power_limit_reports += 1;
                self.shared_stats
                    .lock()
                    .unwrap()
                    .saw(&report.device_id, "power limit report");
                self.publish(Message::retained(
                    format!(
                        "{}/{}/holding/output_power_limit",
                        mqtt::STATE_PREFIX,
                        report.device_id
                    ),
                    report.value.to_string().into_bytes(),
                ))?;
            }
            WireMessage::Unknown(word) => {
                self.shared_stats.lock().unwrap().unknown_frames += 1;
                debug!("unrecognized frame on {} (word {})", message.topic, word);
            }
        }

        Ok(())
    }

    fn handle_report(&self, report: &ModbusMessage) -> Result<()> {
        let catalog = match self.catalogs.for_device_id(&report.device_id) {
            Some(catalog) => catalog,
            None => {
                warn!("unknown device family for {}, dropping", report.device_id);
                return Ok(());
            }
        };

        match report.function {
            ModbusFunction::ReadInput => {
                let values = catalog.decode_inputs(report);
                if let Some(power) = implausible_power(&values) {
                    warn!(
                        "dropping report from {}: implausible pv power {} W",
                        report.device_id, power
                    );
                    return Ok(());
                }
                self.publish_inputs(report, &values)?;
            }
            _ => {
                let values = catalog.decode_holdings(report);
                for value in &values {
                    self.publish(Message::retained(
                        format!(
                            "{}/{}/holding/{}",
                            mqtt::STATE_PREFIX,
                            report.device_id,
                            value.name
                        ),
                        value.value.to_string().into_bytes(),
                    ))?;
                }
            }
        }

        self.announce(&report.device_id, false)?;
        Ok(())
    }

    fn publish_inputs(&self, report: &ModbusMessage, values: &[RegisterValue]) -> Result<()> {
        let mut map = serde_json::Map::new();
        for value in values {
            map.insert(value.name.clone(), serde_json::to_value(&value.value)?);
        }
        if let Some(ts) = report.metadata.as_ref().and_then(|m| m.timestamp) {
            map.insert("device_time".to_string(), json!(ts.to_string()));
        }

        self.publish(Message::new(
            format!("{}/{}/input", mqtt::STATE_PREFIX, report.device_id),
            serde_json::to_vec(&serde_json::Value::Object(map))?,
        ))?;

        for value in values {
            self.publish(Message::new(
                format!(
                    "{}/{}/input/{}",
                    mqtt::STATE_PREFIX,
                    report.device_id,
                    value.name
                ),
                value.value.to_string().into_bytes(),
            ))?;
        }

        Ok(())
    }
    // }}}

    // command -> device {{{
    fn handle_command(&self, message: &Message) -> Result<()> {
        let (device_id, parts) = message.split_cmd_topic()?;
        let family = DeviceFamily::from_device_id(device_id)
            .ok_or_else(|| anyhow!("unknown device family for {}", device_id))?;

        let command: Command = match parts[..] {
            ["output_power_limit"] | ["holding", "output_power_limit"]
                if family == DeviceFamily::Neo =>
            {
                NeoSetOutputPowerLimit {
                    device_id: device_id.to_string(),
                    value: message.payload_u16()?,
                }
                .into()
            }
            ["read", "output_power_limit"] if family == DeviceFamily::Neo => {
                NeoReadOutputPowerLimit::new(device_id).into()
            }
            ["smart_power"] if family == DeviceFamily::Noah => NoahSmartPower {
                device_id: device_id.to_string(),
                power_diff: message.payload_i32()?,
            }
            .into(),
            ["holding", name] => {
                let catalog = self.catalogs.get(family);
                let position = catalog
                    .holding_position(name)
                    .ok_or_else(|| anyhow!("no writable holding register named {}", name))?;
                PresetSingleRegister::new(device_id, position.register_no, message.payload_u16()?)
                    .into()
            }
            ["read", name] => {
                let register = match name.parse() {
                    Ok(register) => register,
                    Err(_) => {
                        let catalog = self.catalogs.get(family);
                        catalog
                            .holding_position(name)
                            .ok_or_else(|| anyhow!("no holding register named {}", name))?
                            .register_no
                    }
                };
                ReadSingleRegister::new(device_id, register).into()
            }
            [..] => bail!("unhandled command: {}", message.topic),
        };

        self.send_to_device(&command)
    }

    fn send_to_device(&self, command: &Command) -> Result<()> {
        let wire = frame::append_crc(&frame::scramble(&command.bytes()));

        self.publish(Message::new(
            format!("s/33/{}", command.device_id()),
            wire,
        ))?;

        self.shared_stats.lock().unwrap().commands_sent += 1;
        Ok(())
    }
    // }}}

    /// Publish discovery for a device the first time we see it, or again
    /// when `force` is set.
    fn announce(&self, device_id: &str, force: bool) -> Result<()> {
        if !self.config.home_assistant().enabled {
            return Ok(());
        }
        if !self.announced.lock().unwrap().insert(device_id.to_string()) && !force {
            return Ok(());
        }

        let family = match DeviceFamily::from_device_id(device_id) {
            Some(family) => family,
            None => return Ok(()),
        };
        let catalog = self.catalogs.get(family);

        info!("announcing {} ({}) to home assistant", device_id, family.name());
        let ha = home_assistant::Config::new(
            device_id,
            family,
            &catalog,
            &self.config.home_assistant().prefix,
        );
        for message in ha.all()? {
            self.publish(message)?;
        }

        Ok(())
    }

    fn publish(&self, message: Message) -> Result<()> {
        if self
            .channels
            .to_mqtt
            .send(ChannelData::Message(message))
            .is_err()
        {
            bail!("send(to_mqtt) failed - channel closed?");
        }
        Ok(())
    }
}

fn implausible_power(values: &[RegisterValue]) -> Option<f64> {
    values.iter().find_map(|v| match (v.name.as_str(), &v.value) {
        ("ppv", Value::Float(power)) if *power > MAX_PLAUSIBLE_POWER => Some(*power),
        _ => None,
    })
}
