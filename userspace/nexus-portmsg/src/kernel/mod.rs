// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Port IPC kernel contract consumed by hosts and clients
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 4 unit tests
//!
//! PUBLIC API:
//!   - PortKernel trait: name service, receive-with-timeout, send, right release
//!   - PortName: opaque right name handed out by a backend
//!   - TransportHeader: fixed 24-byte header leading every packet
//!   - Wait: blocking behaviour of a kernel call
//!   - KernelError: backend failure kinds with numeric codes
//!
//! BACKENDS:
//!   - loopback::LoopbackKernel: in-process emulation with bounded FIFO queues
//!   - unix::UnixKernel: Unix datagram sockets under a namespace directory
//!
//! INVARIANTS:
//!   - A packet's header `size` equals the packet length and is a multiple of 4
//!   - Receiving never writes past the caller's buffer; oversized packets are dropped
//!   - Releasing a receive right wakes a blocked receiver with `PortDead`

use core::fmt;
use core::time::Duration;

pub mod loopback;
#[cfg(all(unix, feature = "unix-backend"))]
pub mod unix;

/// Behaviour of a blocking kernel call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return immediately if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Maps an optional timeout onto a wait mode; a zero timeout polls.
    pub const fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            None => Self::Blocking,
            Some(duration) if duration.is_zero() => Self::NonBlocking,
            Some(duration) => Self::Timeout(duration),
        }
    }

    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Name of a send or receive right inside one kernel backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortName(u32);

impl PortName {
    /// The null right; never routable.
    pub const NULL: Self = Self(0);

    /// Wraps a raw right name.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns `true` for [`PortName::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for PortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port#{:#x}", self.0)
    }
}

/// Failures reported by a kernel backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// The name service already holds a live entry for this name.
    #[error("service name already registered")]
    AlreadyRegistered,
    /// The name service has no entry for this name.
    #[error("service name not found")]
    NotFound,
    /// The name is empty or cannot be represented by the backend.
    #[error("invalid service name")]
    InvalidServiceName,
    /// The call did not complete within its wait budget.
    #[error("operation timed out")]
    TimedOut,
    /// The destination receive right no longer exists.
    #[error("port is dead")]
    PortDead,
    /// The right name is unknown or of the wrong kind.
    #[error("invalid right {0}")]
    InvalidRight(PortName),
    /// The packet did not fit in the receive buffer or the socket send buffer and was dropped.
    #[error("packet of {size} bytes exceeds buffer of {capacity} bytes")]
    TooLarge {
        /// Size of the dropped packet.
        size: usize,
        /// Capacity of the buffer that refused it.
        capacity: usize,
    },
    /// The packet's transport header is truncated or inconsistent.
    #[error("malformed transport header")]
    InvalidHeader,
    /// An operating-system call failed with this errno.
    #[error("os error {0}")]
    Os(i32),
}

impl KernelError {
    /// Numeric code for the failure, stable across backends.
    ///
    /// Name-service codes follow bootstrap conventions (1100/1102), message codes the
    /// `0x1000_xxxx` send/receive families. `Os` carries the raw errno.
    pub const fn code(&self) -> i32 {
        match self {
            Self::AlreadyRegistered => 1100,
            Self::NotFound => 1102,
            Self::InvalidServiceName => 1103,
            Self::TimedOut => 0x1000_0004,
            Self::PortDead => 0x1000_0003,
            Self::InvalidRight(_) => 0x1000_000f,
            Self::TooLarge { .. } => 0x1000_4004,
            Self::InvalidHeader => 0x1000_0008,
            Self::Os(errno) => *errno,
        }
    }

    /// Classifies an I/O error from a socket-backed backend.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => Self::TimedOut,
            ErrorKind::ConnectionRefused | ErrorKind::NotFound => Self::PortDead,
            _ => Self::Os(err.raw_os_error().unwrap_or(-1)),
        }
    }
}

/// Header bits for a copy-send message (`MACH_MSG_TYPE_COPY_SEND` in the remote slot).
pub const COPY_SEND_BITS: u32 = 19;

/// Fixed-layout header leading every packet, encoded little-endian.
///
/// Layout: `[bits:4][size:4][remote:4][local:4][voucher:4][id:4]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportHeader {
    /// Disposition bits for the carried rights.
    pub bits: u32,
    /// Total packet size in bytes, header included.
    pub size: u32,
    /// Destination right.
    pub remote: PortName,
    /// Reply right, `NULL` for one-way messages.
    pub local: PortName,
    /// Voucher right, unused.
    pub voucher: u32,
    /// Message id, unused by this crate.
    pub id: i32,
}

impl TransportHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 24;

    /// One-way header delivering `size` bytes to `remote`.
    pub const fn copy_send(remote: PortName, size: u32) -> Self {
        Self { bits: COPY_SEND_BITS, size, remote, local: PortName::NULL, voucher: 0, id: 0 }
    }

    /// Serializes the header into the first [`Self::SIZE`] bytes of `buf`.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`Self::SIZE`].
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.bits.to_le_bytes());
        buf[4..8].copy_from_slice(&self.size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.remote.raw().to_le_bytes());
        buf[12..16].copy_from_slice(&self.local.raw().to_le_bytes());
        buf[16..20].copy_from_slice(&self.voucher.to_le_bytes());
        buf[20..24].copy_from_slice(&self.id.to_le_bytes());
    }

    /// Parses a header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, KernelError> {
        if buf.len() < Self::SIZE {
            return Err(KernelError::InvalidHeader);
        }
        let word = |at: usize| u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
        Ok(Self {
            bits: word(0),
            size: word(4),
            remote: PortName::new(word(8)),
            local: PortName::new(word(12)),
            voucher: word(16),
            id: word(20) as i32,
        })
    }
}

/// Checks an outgoing packet against its header and returns the parsed header.
pub fn validate_outgoing(packet: &[u8]) -> Result<TransportHeader, KernelError> {
    let header = TransportHeader::decode(packet)?;
    if header.size as usize != packet.len() || header.size % 4 != 0 {
        return Err(KernelError::InvalidHeader);
    }
    if header.remote.is_null() {
        return Err(KernelError::InvalidRight(header.remote));
    }
    Ok(header)
}

/// Port-based IPC primitive.
///
/// Receive rights come from [`PortKernel::register_name`], send rights from
/// [`PortKernel::lookup_name`]. Both are released with [`PortKernel::release`].
pub trait PortKernel: Send + Sync {
    /// Checks a new service in under `name` and returns its receive right.
    fn register_name(&self, name: &str) -> Result<PortName, KernelError>;

    /// Looks `name` up and returns a send right to it.
    fn lookup_name(&self, name: &str) -> Result<PortName, KernelError>;

    /// Receives the next packet on `port` into `buf`, overwriting its prefix.
    ///
    /// Returns the packet header; `header.size` bytes of `buf` are valid.
    fn receive(&self, port: PortName, buf: &mut [u8], wait: Wait)
        -> Result<TransportHeader, KernelError>;

    /// Sends a fully framed packet to the right named in its header.
    fn send(&self, packet: &[u8], wait: Wait) -> Result<(), KernelError>;

    /// Deallocates `port`. Unknown names are ignored.
    fn release(&self, port: PortName);
}
