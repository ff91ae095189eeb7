mod common;
use common::*;

use growatt_bridge::growatt::modbus::{ModbusBlock, ModbusMessage};
use growatt_bridge::growatt::registers::{DeviceFamily, RegisterCatalog, Value};
use growatt_bridge::utils::Utils;

fn block_values(pairs: &[u16]) -> Vec<u8> {
    pairs.iter().flat_map(|v| v.to_be_bytes()).collect()
}

#[test]
fn report_roundtrip() {
    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, block_values(&[1, 2500]))]);

    let mut bytes = report.bytes();
    // the length field counts the trailer the sender appends later
    assert_eq!(Utils::u16_be(&bytes, 4) as usize, bytes.len() + 2 - 8);

    bytes.extend_from_slice(&[0, 0]);
    assert_eq!(ModbusMessage::decode(&bytes).unwrap(), report);
}

#[test]
fn decode_inputs_against_neo_catalog() {
    // registers 0..=8: status, pv1 v/a, pv1 power (4 bytes), pv2 v/a, pv2
    // power (4 bytes)
    let mut values = block_values(&[1, 2500, 10]);
    values.extend_from_slice(&4000u32.to_be_bytes());
    values.extend(block_values(&[0, 0]));
    values.extend_from_slice(&0u32.to_be_bytes());
    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, values)]);

    let catalog = RegisterCatalog::embedded(DeviceFamily::Neo).unwrap();
    let decoded = catalog.decode_inputs(&report);

    let get = |name: &str| {
        decoded
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.value.clone())
    };

    assert_eq!(get("status"), Some(Value::Int(1)));
    assert_eq!(get("pv1_voltage"), Some(Value::Float(250.0)));
    assert_eq!(get("pv1_current"), Some(Value::Float(1.0)));
    assert_eq!(get("pv1_power"), Some(Value::Float(400.0)));
    assert_eq!(get("pv2_power"), Some(Value::Float(0.0)));
    // registers outside the block are skipped
    assert_eq!(get("grid_voltage"), None);

    // sorted by wire position
    let positions: Vec<u16> = decoded.iter().map(|v| v.register_no).collect();
    let mut sorted = positions.clone();
    sorted.sort_unstable();
    assert_eq!(positions, sorted);
}

#[test]
fn trailing_garbage_block_degrades_gracefully() {
    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, block_values(&[1, 2500]))]);
    let mut bytes = report.bytes();

    // append an unparseable second block (end before start) plus filler
    bytes.extend_from_slice(&[0xff, 0xff, 0x00, 0x00, 0xaa, 0xbb]);
    bytes.extend_from_slice(&[0, 0]);
    let len = bytes.len();
    bytes[4..6].copy_from_slice(&((len - 8) as u16).to_be_bytes());

    let decoded = ModbusMessage::decode(&bytes).unwrap();
    assert_eq!(decoded.blocks.len(), 1);
    assert_eq!(decoded.blocks[0], report.blocks[0]);
}

#[test]
fn first_bad_block_is_an_error() {
    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, block_values(&[1]))]);

    let mut bytes = report.bytes();
    // corrupt the block start so end < start
    let block_offset = 38 + 37;
    bytes[block_offset..block_offset + 2].copy_from_slice(&0xffffu16.to_be_bytes());
    bytes.extend_from_slice(&[0, 0]);

    assert!(ModbusMessage::decode(&bytes).is_err());
}

#[test]
fn length_mismatch_is_rejected() {
    let report = Factory::neo_input_report(vec![ModbusBlock::new(0, block_values(&[1, 2]))]);
    let mut bytes = report.bytes();
    bytes.extend_from_slice(&[0, 0]);
    bytes[4..6].copy_from_slice(&999u16.to_be_bytes());

    assert!(ModbusMessage::decode(&bytes).is_err());
}
