mod common;
use common::*;

use growatt_bridge::coordinator::Coordinator;
use growatt_bridge::growatt::command::{MessageCommon, NeoOutputPowerLimit};
use growatt_bridge::growatt::modbus::{ModbusBlock, ModbusFunction, ModbusMessage};
use growatt_bridge::growatt::registers::Catalogs;
use growatt_bridge::prelude::*;

async fn start_coordinator(config: ConfigWrapper) -> (Channels, tokio::task::JoinHandle<()>) {
    let channels = Channels::new();
    let coordinator = Coordinator::new(config, Catalogs::load().unwrap(), channels.clone());
    let handle = tokio::spawn(async move {
        let _ = coordinator.start().await;
    });
    // let the coordinator task run up to its subscribe before any send
    tokio::task::yield_now().await;
    (channels, handle)
}

#[tokio::test]
async fn input_report_publishes_decoded_state() -> Result<()> {
    let (channels, _handle) = start_coordinator(Factory::config()).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let mut values: Vec<u8> = [1u16, 2500, 10]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect();
    values.extend_from_slice(&4000u32.to_be_bytes());
    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, values)]);

    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &report.bytes()))?;

    let messages = drain(&mut to_mqtt).await;

    let aggregate = find(&messages, &format!("growatt/{}/input", NEO_DEVICE))
        .expect("no aggregate state");
    let json: serde_json::Value = serde_json::from_slice(&aggregate.payload)?;
    assert_eq!(json["status"], 1);
    assert_eq!(json["pv1_voltage"], 250.0);
    assert_eq!(json["pv1_power"], 400.0);

    let individual = find(
        &messages,
        &format!("growatt/{}/input/pv1_voltage", NEO_DEVICE),
    )
    .expect("no individual state");
    assert_eq!(individual.payload, b"250");

    Ok(())
}

#[tokio::test]
async fn holding_readback_publishes_retained_state() -> Result<()> {
    let (channels, _handle) = start_coordinator(Factory::config()).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let report = ModbusMessage {
        counter: 2,
        device_id: NEO_DEVICE.to_string(),
        function: ModbusFunction::ReadHolding,
        metadata: None,
        blocks: vec![ModbusBlock::new(3, vec![0, 50])],
    };

    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &report.bytes()))?;

    let messages = drain(&mut to_mqtt).await;
    let state = find(
        &messages,
        &format!("growatt/{}/holding/active_power_rate", NEO_DEVICE),
    )
    .expect("no holding state");
    assert!(state.retain);
    assert_eq!(state.payload, b"50");

    Ok(())
}

#[tokio::test]
async fn power_limit_report_updates_holding_state() -> Result<()> {
    let (channels, _handle) = start_coordinator(Factory::config()).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let report = NeoOutputPowerLimit {
        device_id: NEO_DEVICE.to_string(),
        value: 600,
    };

    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &report.bytes()))?;

    let messages = drain(&mut to_mqtt).await;
    let state = find(
        &messages,
        &format!("growatt/{}/holding/output_power_limit", NEO_DEVICE),
    )
    .expect("no power limit state");
    assert!(state.retain);
    assert_eq!(state.payload, b"600");

    Ok(())
}

#[tokio::test]
async fn first_report_announces_device_to_home_assistant() -> Result<()> {
    let (channels, _handle) = start_coordinator(Factory::config_with_ha()).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, vec![0, 1, 0, 2])]);
    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &report.bytes()))?;

    let messages = drain(&mut to_mqtt).await;
    let discovery: Vec<_> = messages
        .iter()
        .filter(|m| m.topic.starts_with("homeassistant/"))
        .collect();
    assert!(!discovery.is_empty());

    // second report must not re-announce
    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &report.bytes()))?;
    let messages = drain(&mut to_mqtt).await;
    assert!(!messages.iter().any(|m| m.topic.starts_with("homeassistant/")));

    Ok(())
}

#[tokio::test]
async fn implausible_pv_power_drops_the_report() -> Result<()> {
    let (channels, _handle) = start_coordinator(Factory::config()).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    // registers 33..=34 carry total pv power; night-time garbage reads
    // decode to megawatts
    let garbage = Factory::neo_input_report(vec![ModbusBlock::new(
        33,
        20_000_000u32.to_be_bytes().to_vec(),
    )]);
    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &garbage.bytes()))?;
    assert!(drain(&mut to_mqtt).await.is_empty());

    let sane = Factory::neo_input_report(vec![ModbusBlock::new(
        33,
        40_000u32.to_be_bytes().to_vec(),
    )]);
    channels
        .from_mqtt
        .send(Factory::uplink(NEO_DEVICE, &sane.bytes()))?;

    let messages = drain(&mut to_mqtt).await;
    let state = find(&messages, &format!("growatt/{}/input/ppv", NEO_DEVICE))
        .expect("sane report not published");
    assert_eq!(state.payload, b"4000");

    Ok(())
}

#[tokio::test]
async fn strict_crc_drops_corrupt_frames() -> Result<()> {
    let yaml = r#"
mqtt:
  host: localhost
home_assistant:
  enabled: false
strict_crc: true
"#;
    let strict: Config = serde_yaml::from_str(yaml).unwrap();

    let (channels, _handle) = start_coordinator(ConfigWrapper::from_config(strict)).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, vec![0, 1])]);
    let mut wire = Factory::on_wire(&report.bytes());
    wire[10] ^= 0xff;

    channels
        .from_mqtt
        .send(growatt_bridge::mqtt::ChannelData::Message(
            growatt_bridge::mqtt::Message::new(format!("c/{}", NEO_DEVICE), wire),
        ))?;

    assert!(drain(&mut to_mqtt).await.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_family_report_is_dropped() -> Result<()> {
    let (channels, _handle) = start_coordinator(Factory::config()).await;
    let mut to_mqtt = channels.to_mqtt.subscribe();

    let report = ModbusMessage {
        counter: 1,
        device_id: "XYZ0000000000000".to_string(),
        function: ModbusFunction::ReadHolding,
        metadata: None,
        blocks: vec![ModbusBlock::new(0, vec![0, 1])],
    };

    channels
        .from_mqtt
        .send(Factory::uplink("XYZ0000000000000", &report.bytes()))?;

    assert!(drain(&mut to_mqtt).await.is_empty());
    Ok(())
}
