// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Packet framing for the kernel-mediated path
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 6 unit tests + alignment property
//!
//! Packet shape: `[transport header:24][payload length:u64le][payload:N][pad]`, padded to a
//! multiple of [`ALIGNMENT`]. Senders write header, length and payload into one buffer;
//! receivers read the length field to learn how many payload bytes follow.
//!
//! INVARIANTS:
//!   - `total % ALIGNMENT == 0` and `total >= PAYLOAD_OFFSET + len` for every layout
//!   - One buffer carries exactly one message
//!   - Parsing never panics on truncated or inconsistent input

use crate::error::{PortError, Result};
use crate::kernel::TransportHeader;

/// Size of the transport header at the front of every packet.
pub const HEADER_SIZE: usize = TransportHeader::SIZE;
/// Offset of the 8-byte little-endian payload length field.
pub const LENGTH_OFFSET: usize = HEADER_SIZE;
/// Offset of the first payload byte.
pub const PAYLOAD_OFFSET: usize = LENGTH_OFFSET + 8;
/// Packet sizes are rounded up to this many bytes.
pub const ALIGNMENT: usize = 8;

/// Rounds `size` up to the next multiple of `alignment` (a power of two).
#[inline]
pub const fn align_up(size: usize, alignment: usize) -> usize {
    (size + (alignment - 1)) & !(alignment - 1)
}

/// Sizes and offsets for one framed message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketLayout {
    payload_len: usize,
    total: usize,
}

impl PacketLayout {
    /// Layout of a packet carrying `payload_len` bytes.
    ///
    /// Fails with [`PortError::PayloadTooLarge`] if the padded packet cannot be described by
    /// the header's 32-bit size field.
    pub fn for_payload(payload_len: usize) -> Result<Self> {
        let max = u32::MAX as usize - (ALIGNMENT - 1) - PAYLOAD_OFFSET;
        if payload_len > max {
            return Err(PortError::PayloadTooLarge { size: payload_len, max });
        }
        Ok(Self { payload_len, total: align_up(PAYLOAD_OFFSET + payload_len, ALIGNMENT) })
    }

    /// Payload bytes carried by the packet.
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Padded packet size.
    pub const fn total(&self) -> usize {
        self.total
    }

    /// Padded packet size as carried in the transport header.
    pub const fn total_u32(&self) -> u32 {
        self.total as u32
    }

    /// Allocates a zeroed buffer of exactly [`Self::total`] bytes.
    pub fn allocate(&self) -> Result<Vec<u8>> {
        let mut packet = Vec::new();
        packet
            .try_reserve_exact(self.total)
            .map_err(|_| PortError::AllocationFailed { size: self.total })?;
        packet.resize(self.total, 0);
        Ok(packet)
    }

    /// Writes the payload length field.
    pub fn write_length(&self, packet: &mut [u8]) {
        packet[LENGTH_OFFSET..PAYLOAD_OFFSET]
            .copy_from_slice(&(self.payload_len as u64).to_le_bytes());
    }

    /// Copies `payload` into place; `payload.len()` must equal [`Self::payload_len`].
    pub fn write_payload(&self, packet: &mut [u8], payload: &[u8]) {
        debug_assert_eq!(payload.len(), self.payload_len);
        packet[PAYLOAD_OFFSET..PAYLOAD_OFFSET + payload.len()].copy_from_slice(payload);
    }
}

/// Returns the payload carried by a received `packet`.
pub fn read_payload(packet: &[u8]) -> Result<&[u8]> {
    if packet.len() < PAYLOAD_OFFSET {
        return Err(PortError::InvalidPayloadBuffer {
            reason: format!("packet of {} bytes is shorter than its framing", packet.len()),
        });
    }
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&packet[LENGTH_OFFSET..PAYLOAD_OFFSET]);
    let declared = u64::from_le_bytes(raw);
    let available = packet.len() - PAYLOAD_OFFSET;
    match usize::try_from(declared) {
        Ok(len) if len <= available => Ok(&packet[PAYLOAD_OFFSET..PAYLOAD_OFFSET + len]),
        _ => Err(PortError::InvalidPayloadBuffer {
            reason: format!("declared payload of {declared} bytes, {available} available"),
        }),
    }
}
