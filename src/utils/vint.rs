//! Little-endian base-128 integers. The last byte of a value carries the
//! stop bit, so a run of values decodes front to back without lengths.

const STOP_BIT: u8 = 0x80;
const MAX_VINT32_LEN: usize = 5;

pub fn encode_vint32(mut val: u32, buf: &mut Vec<u8>) {
    loop {
        let b = (val & 0x7F) as u8;
        val >>= 7;
        if val == 0 {
            buf.push(b | STOP_BIT);
            return;
        }
        buf.push(b);
    }
}

/// Decodes one value and advances `data` past it. Panics on truncated input,
/// which only happens if an in-memory buffer was built wrongly.
pub fn decode_vint32(data: &mut &[u8]) -> u32 {
    let len = data
        .iter()
        .take(MAX_VINT32_LEN)
        .position(|&b| b & STOP_BIT != 0)
        .map(|i| i + 1)
        .unwrap_or_else(|| panic!("truncated vint in a buffer of {} bytes", data.len()));
    let mut result = 0u32;
    for (i, &b) in data[..len].iter().enumerate() {
        result |= u32::from(b & 0x7F) << (7 * i);
    }
    *data = &data[len..];
    result
}

pub fn vint32_len(val: u32) -> usize {
    let bits = (u32::BITS - val.leading_zeros()).max(1) as usize;
    bits.div_ceil(7)
}
