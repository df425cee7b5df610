/// Check if a u16 value is a GREASE value (RFC 8701).
///
/// GREASE values follow the pattern 0x?A?A where both bytes are identical:
/// 0x0A0A, 0x1A1A, 0x2A2A, ..., 0xFAFA. Clients sprinkle them into cipher
/// suite, extension, group and version lists to keep servers honest about
/// ignoring what they don't understand.
pub fn is_grease_u16(val: u16) -> bool {
    let hi = (val >> 8) as u8;
    let lo = val as u8;
    hi == lo && (hi & 0x0F) == 0x0A
}

/// Filter GREASE values from a slice of u16 values.
pub fn filter_grease_u16(values: &[u16]) -> Vec<u16> {
    values.iter().copied().filter(|v| !is_grease_u16(*v)).collect()
}
