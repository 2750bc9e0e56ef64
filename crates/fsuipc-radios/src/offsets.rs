//! Where the radio stack lives in the peer's address space, per field
//! width. The narrow slots hold 16-bit BCD words, the wide slots hold
//! 32-bit Hz values.

use fsuipc_link::handshake::{OFFSET_PROBE_NARROW, OFFSET_PROBE_WIDE};

pub struct RadioOffsets {
    pub com1_active: u32,
    pub com1_standby: u32,
    pub com2_active: u32,
    pub com2_standby: u32,
}

pub const NARROW: RadioOffsets = RadioOffsets {
    com1_active: OFFSET_PROBE_NARROW,
    com1_standby: 0x311A,
    com2_active: 0x3118,
    com2_standby: 0x311C,
};

pub const WIDE: RadioOffsets = RadioOffsets {
    com1_active: OFFSET_PROBE_WIDE,
    com1_standby: 0x05CC,
    com2_active: 0x05C8,
    com2_standby: 0x05D0,
};

/// Which radios are selected, one flag bit per radio.
pub const RADIO_SWITCH: u32 = 0x3122;
