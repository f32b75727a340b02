// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by hosts, clients and payload codecs.

use crate::kernel::KernelError;

/// Result alias for messaging operations.
pub type Result<T> = core::result::Result<T, PortError>;

/// Errors produced by the messaging layer.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// The kernel name service already has a live service under this name.
    #[error("endpoint '{endpoint}' is already registered")]
    EndpointAlreadyRegistered {
        /// Endpoint name that collided.
        endpoint: String,
    },

    /// Checking the endpoint in with the kernel failed for another reason.
    #[error("failed to register endpoint '{endpoint}'")]
    Registration {
        /// Endpoint being registered.
        endpoint: String,
        /// Kernel failure.
        #[source]
        source: KernelError,
    },

    /// No local host and no kernel service answer to this name.
    #[error("failed to look up endpoint '{endpoint}'")]
    EndpointLookupFailed {
        /// Endpoint being resolved.
        endpoint: String,
        /// Kernel failure.
        #[source]
        source: KernelError,
    },

    /// The local host this client resolved to has been dropped.
    #[error("local receiver for '{endpoint}' is gone")]
    ReceiverGone {
        /// Endpoint the client was resolved to.
        endpoint: String,
    },

    /// The packet buffer could not be allocated.
    #[error("failed to allocate {size} byte packet")]
    AllocationFailed {
        /// Requested packet size.
        size: usize,
    },

    /// The kernel refused the packet.
    #[error("kernel send failed with code {code:#x}")]
    SendFailed {
        /// Numeric kernel code, see [`KernelError::code`].
        code: i32,
        /// Kernel failure.
        #[source]
        source: KernelError,
    },

    /// A payload buffer did not have the expected shape.
    #[error("invalid payload buffer: {reason}")]
    InvalidPayloadBuffer {
        /// What was wrong with the buffer.
        reason: String,
    },

    /// Payload bytes could not be decoded into the message type.
    #[error("failed to decode payload: {message}")]
    DecodeFailed {
        /// Decoder diagnostics.
        message: String,
    },

    /// Payload bytes could not be produced from the message value.
    #[error("failed to encode payload: {message}")]
    EncodeFailed {
        /// Encoder diagnostics.
        message: String,
    },

    /// The payload does not fit in a single packet.
    #[error("payload of {size} bytes exceeds the {max} byte packet limit")]
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Largest payload a packet can carry.
        max: usize,
    },

    /// A host or client configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The receive thread could not be started.
    #[error("failed to spawn receive thread")]
    ThreadSpawn(#[source] std::io::Error),
}

impl PortError {
    /// Wraps a kernel send failure, keeping its numeric code.
    pub fn send_failed(source: KernelError) -> Self {
        Self::SendFailed { code: source.code(), source }
    }

    /// Builds a [`PortError::DecodeFailed`] from any displayable decoder error.
    pub fn decode(err: impl core::fmt::Display) -> Self {
        Self::DecodeFailed { message: err.to_string() }
    }
}
