/* Unsigned LEB128, as used for string lengths in the DEX data section. */

#[cfg(test)]
pub(crate) fn encode_uleb128(value: u32) -> Vec<u8> {
    let mut result = Vec::new();
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;
        if remaining != 0 {
            byte |= 0x80;
        }
        result.push(byte);
        if remaining == 0 {
            break;
        }
    }

    result
}

/// Returns the decoded value and the number of bytes consumed, or `None` when the
/// input ends before the final byte.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Option<(u32, usize)> {
    let mut value: u32 = 0;
    let mut shift: u32 = 0;

    for (ix, &byte) in encoded.iter().enumerate() {
        let low = (byte & 0x7F) as u32;
        if shift < 32 {
            value |= low.wrapping_shl(shift);
        }
        shift += 7;

        // 32-bit values never need more than 5 bytes.
        if (byte & 0x80) == 0 || ix == 4 {
            return Some((value, ix + 1));
        }
    }

    None
}
