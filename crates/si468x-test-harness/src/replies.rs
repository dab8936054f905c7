//! Builders for chip replies used in tests.
//!
//! Every reply starts with four status bytes: byte 0 carries CTS/ERR and the
//! interrupt flags, byte 1 the digital-radio flags, byte 3 the firmware
//! lifecycle state in bits 7:6.

/// Reply byte 3 for a running bootloader.
pub const BOOTLOADER: u8 = 0x80;
/// Reply byte 3 for a running receiver application.
pub const APPLICATION: u8 = 0xC0;

/// A successful reply of `len` bytes with the given lifecycle bits.
pub fn ok(len: usize, state: u8) -> Vec<u8> {
    with_status(len, 0x80, state)
}

/// A successful reply from a running application.
pub fn app_ok(len: usize) -> Vec<u8> {
    ok(len, APPLICATION)
}

/// A reply of `len` bytes with an explicit status byte 0.
pub fn with_status(len: usize, status0: u8, state: u8) -> Vec<u8> {
    let mut reply = vec![0u8; len.max(4)];
    reply[0] = status0;
    reply[3] = state;
    reply
}

/// An error reply carrying `code` in byte 4.
pub fn error(code: u8, state: u8) -> Vec<u8> {
    let mut reply = with_status(5, 0xC0, state);
    reply[4] = code;
    reply
}

/// Write `value` little-endian at `offset`.
pub fn put_le16(reply: &mut [u8], offset: usize, value: u16) {
    reply[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Write `value` little-endian at `offset`.
pub fn put_le32(reply: &mut [u8], offset: usize, value: u32) {
    reply[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
