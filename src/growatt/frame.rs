/// Number of cleartext header bytes at the start of every frame. Everything
/// past this point is XOR-obfuscated with [`MASK`].
pub const HEADER_LEN: usize = 8;

/// Repeating XOR key applied to the frame body.
const MASK: &[u8] = b"Growatt";

/// XOR the body of a frame with the repeating mask, leaving the 8-byte
/// header untouched. The transform is its own inverse.
pub fn scramble(frame: &[u8]) -> Vec<u8> {
    let mut out = frame[..HEADER_LEN.min(frame.len())].to_vec();
    out.extend(
        frame
            .iter()
            .skip(HEADER_LEN)
            .enumerate()
            .map(|(i, b)| b ^ MASK[i % MASK.len()]),
    );
    out
}

/// Undo the obfuscation on a received frame. Identical to [`scramble`];
/// kept as a separate name so call sites read in the right direction.
pub fn descramble(frame: &[u8]) -> Vec<u8> {
    scramble(frame)
}

fn crc16_modbus(data: &[u8]) -> u16 {
    crc16::State::<crc16::MODBUS>::calculate(data)
}

/// Append the CRC-16/MODBUS of the whole frame, big-endian.
pub fn append_crc(frame: &[u8]) -> Vec<u8> {
    let mut out = frame.to_vec();
    out.extend_from_slice(&crc16_modbus(frame).to_be_bytes());
    out
}

/// Recompute the CRC over everything but the 2-byte trailer and compare.
///
/// A mismatch on the receive path is reported to the caller, which decides
/// whether to drop the frame (`strict_crc`) or just log it. Frames shorter
/// than the trailer always fail.
pub fn verify_crc(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (body, trailer) = frame.split_at(frame.len() - 2);
    crc16_modbus(body).to_be_bytes() == trailer
}
