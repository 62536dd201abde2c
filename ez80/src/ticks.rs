use crate::error::ProtocolError;

pub const TICK_BYTES: usize = 3;
pub const MAX_TICKS: u32 = (1 << 24) - 1;

/// Packs an encoder count as a 3-byte little-endian integer.
pub fn pack_ticks(count: u32) -> Result<[u8; TICK_BYTES], ProtocolError> {
    if count > MAX_TICKS {
        return Err(ProtocolError::TickOverflow(count));
    }
    let [b0, b1, b2, _] = count.to_le_bytes();
    Ok([b0, b1, b2])
}

pub fn unpack_ticks(bytes: [u8; TICK_BYTES]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}
