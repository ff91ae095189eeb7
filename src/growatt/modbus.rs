use crate::prelude::*;
use crate::growatt::registers::RegisterPosition;
use crate::utils::Utils;

use chrono::{NaiveDate, NaiveDateTime};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::convert::TryFrom;

/// Byte count of the fixed message header: counter, constant 7, length,
/// device address, function, 30-byte device id.
const HEADER_LEN: usize = 38;

/// Upper bound on registers in one block; anything larger is a corrupt
/// frame.
pub const MAX_BLOCK_REGISTERS: u16 = 512;

#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ModbusFunction {
    ReadHolding = 3,
    ReadInput = 4,
    ReadSingle = 5,
    PresetSingle = 6,
    PresetMultiple = 16,
}

// ModbusBlock {{{

/// One contiguous run of 16-bit register values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModbusBlock {
    pub start: u16,
    pub end: u16,
    pub values: Vec<u8>,
}

impl ModbusBlock {
    pub fn new(start: u16, values: Vec<u8>) -> Self {
        let end = start + (values.len() as u16 / 2).saturating_sub(1);
        Self { start, end, values }
    }

    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < 4 {
            bail!("register block too short: {} bytes", input.len());
        }

        let start = Utils::u16_be(input, 0);
        let end = Utils::u16_be(input, 2);
        if end < start {
            bail!("register block end {} before start {}", end, start);
        }
        let qty = end - start + 1;
        if qty > MAX_BLOCK_REGISTERS {
            bail!("register block of {} registers is implausible", qty);
        }

        let len = qty as usize * 2;
        let values = input
            .get(4..4 + len)
            .ok_or_else(|| anyhow!("register block truncated: want {} value bytes", len))?
            .to_vec();

        Ok(Self { start, end, values })
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size());
        out.extend_from_slice(&self.start.to_be_bytes());
        out.extend_from_slice(&self.end.to_be_bytes());
        out.extend_from_slice(&self.values);
        out
    }

    pub fn size(&self) -> usize {
        4 + self.values.len()
    }

    fn covers(&self, register_no: u16) -> bool {
        self.start <= register_no && register_no <= self.end
    }
} // }}}

// Metadata {{{

/// Device serial and timestamp block present in read-input reports.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Metadata {
    pub device_sn: String,
    pub timestamp: Option<NaiveDateTime>,
}

impl Metadata {
    pub const SIZE: usize = 37;

    fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < Self::SIZE {
            bail!("metadata block too short: {} bytes", input.len());
        }

        let device_sn = Utils::ascii_trimmed(&input[0..30]);
        let (y, mo, d, h, mi, s, ms) = (
            input[30], input[31], input[32], input[33], input[34], input[35], input[36],
        );

        // out-of-range fields mean no usable timestamp, not a bad message
        let timestamp = NaiveDate::from_ymd_opt(2000 + y as i32, mo as u32, d as u32)
            .and_then(|date| date.and_hms_milli_opt(h as u32, mi as u32, s as u32, ms as u32));

        Ok(Self {
            device_sn,
            timestamp,
        })
    }

    fn bytes(&self) -> Vec<u8> {
        let mut out = Utils::padded_ascii(&self.device_sn, 30);
        match &self.timestamp {
            Some(ts) => {
                use chrono::{Datelike, Timelike};
                out.push((ts.year() - 2000) as u8);
                out.push(ts.month() as u8);
                out.push(ts.day() as u8);
                out.push(ts.hour() as u8);
                out.push(ts.minute() as u8);
                out.push(ts.second() as u8);
                out.push((ts.nanosecond() / 1_000_000) as u8);
            }
            None => out.extend_from_slice(&[0; 7]),
        }
        out
    }
} // }}}

/// A register report or readback sent by the device.
///
/// Wire layout: 2B counter, 2B constant 7, 2B message length, 1B device
/// address (always 1 over MQTT), 1B function, 30B NUL-padded device id,
/// then (for read-input reports only) a [`Metadata`] block, then one or
/// more register blocks. The message length covers everything from byte 8
/// onwards including the CRC trailer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModbusMessage {
    pub counter: u16,
    pub device_id: String,
    pub function: ModbusFunction,
    pub metadata: Option<Metadata>,
    pub blocks: Vec<ModbusBlock>,
}

impl ModbusMessage {
    /// Parse a descrambled frame, trailer included.
    pub fn decode(input: &[u8]) -> Result<Self> {
        if input.len() < HEADER_LEN + 2 {
            bail!("modbus message too short: {} bytes", input.len());
        }

        let counter = Utils::u16_be(input, 0);
        let msg_len = Utils::u16_be(input, 4) as usize;
        if msg_len != input.len() - 8 {
            bail!(
                "modbus length mismatch: header says {}, frame has {}",
                msg_len,
                input.len() - 8
            );
        }

        let function = ModbusFunction::try_from(input[7])
            .map_err(|_| anyhow!("unknown modbus function {}", input[7]))?;
        let device_id = Utils::ascii_trimmed(&input[8..38]);

        let mut offset = HEADER_LEN;
        let metadata = if function == ModbusFunction::ReadInput {
            let m = Metadata::decode(&input[offset..])?;
            offset += Metadata::SIZE;
            Some(m)
        } else {
            None
        };

        // everything up to the 2-byte trailer is register blocks
        let end = input.len() - 2;
        let mut blocks = Vec::new();
        while end > offset + 4 {
            match ModbusBlock::decode(&input[offset..end]) {
                Ok(block) => {
                    offset += block.size();
                    blocks.push(block);
                }
                // trailing blocks are best-effort; whatever parsed so far
                // still gets published
                Err(err) if !blocks.is_empty() => {
                    warn!("ignoring trailing register block: {}", err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        if blocks.is_empty() {
            bail!("modbus message carries no register blocks");
        }

        Ok(Self {
            counter,
            device_id,
            function,
            metadata,
            blocks,
        })
    }

    /// Inverse of [`Self::decode`], minus the CRC trailer the sender
    /// appends after scrambling.
    pub fn bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&7u16.to_be_bytes());
        out.extend_from_slice(&(self.msg_len() as u16).to_be_bytes());
        out.push(1);
        out.push(self.function.into());
        out.extend_from_slice(&Utils::padded_ascii(&self.device_id, 30));
        if let Some(metadata) = &self.metadata {
            out.extend_from_slice(&metadata.bytes());
        }
        for block in &self.blocks {
            out.extend_from_slice(&block.bytes());
        }
        out
    }

    /// Message length field: bytes from offset 8 to the end of the frame,
    /// CRC trailer included.
    fn msg_len(&self) -> usize {
        let mut len = 30 + 2;
        if self.metadata.is_some() {
            len += Metadata::SIZE;
        }
        len + self.blocks.iter().map(ModbusBlock::size).sum::<usize>()
    }

    /// Raw bytes for a descriptor's wire position, if any block covers it.
    pub fn get_data(&self, pos: &RegisterPosition) -> Option<&[u8]> {
        let block = self.blocks.iter().find(|b| b.covers(pos.register_no))?;
        let from = (pos.register_no - block.start) as usize * 2 + pos.offset as usize;
        block.values.get(from..from + pos.size as usize)
    }
}
