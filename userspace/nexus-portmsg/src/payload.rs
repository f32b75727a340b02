// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Payload capability tiers carried by the transport
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 10 unit tests + 2 round-trip properties
//!
//! PUBLIC API:
//!   - Payload: raw-buffer tier, the only tier the transport uses
//!   - ByteMessage: byte-sequence tier; every implementor is a Payload
//!   - Json<T>: serde adapter turning any Serialize + DeserializeOwned type into a ByteMessage
//!   - json_message!: opts a named serde type into ByteMessage directly
//!
//! INVARIANTS:
//!   - The transport only copies bytes and never branches on the message type
//!   - Malformed input surfaces as PortError::DecodeFailed / InvalidPayloadBuffer, never a panic

use std::borrow::Cow;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{PortError, Result};

/// A message that can be rebuilt from, and viewed as, a contiguous byte buffer.
pub trait Payload: Sized + Send + 'static {
    /// Rebuilds a message from the payload bytes of a received packet.
    fn from_payload(bytes: &[u8]) -> Result<Self>;

    /// Calls `body` with the message's payload bytes.
    fn with_payload<R>(&self, body: impl FnOnce(&[u8]) -> R) -> Result<R>;

    /// Number of payload bytes.
    fn payload_len(&self) -> usize;
}

/// A message that encodes to and decodes from a byte sequence.
pub trait ByteMessage: Sized + Send + 'static {
    /// Decodes a message from `bytes`.
    fn from_message_bytes(bytes: &[u8]) -> Result<Self>;

    /// Encodes the message, borrowing when the value already is a byte sequence.
    fn message_bytes(&self) -> Result<Cow<'_, [u8]>>;
}

impl<T: ByteMessage> Payload for T {
    fn from_payload(bytes: &[u8]) -> Result<Self> {
        T::from_message_bytes(bytes)
    }

    fn with_payload<R>(&self, body: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let bytes = self.message_bytes()?;
        Ok(body(&bytes))
    }

    fn payload_len(&self) -> usize {
        // Encoders that fail here fail again on send, where the error is reported.
        self.message_bytes().map(|bytes| bytes.len()).unwrap_or(0)
    }
}

impl ByteMessage for Vec<u8> {
    fn from_message_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }

    fn message_bytes(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(self))
    }
}

impl ByteMessage for Box<[u8]> {
    fn from_message_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.into())
    }

    fn message_bytes(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(self))
    }
}

impl ByteMessage for String {
    fn from_message_bytes(bytes: &[u8]) -> Result<Self> {
        std::str::from_utf8(bytes).map(str::to_owned).map_err(PortError::decode)
    }

    fn message_bytes(&self) -> Result<Cow<'_, [u8]>> {
        Ok(Cow::Borrowed(self.as_bytes()))
    }
}

impl<const N: usize> Payload for [u8; N] {
    fn from_payload(bytes: &[u8]) -> Result<Self> {
        bytes.try_into().map_err(|_| PortError::InvalidPayloadBuffer {
            reason: format!("expected {N} bytes, got {}", bytes.len()),
        })
    }

    fn with_payload<R>(&self, body: impl FnOnce(&[u8]) -> R) -> Result<R> {
        Ok(body(self))
    }

    fn payload_len(&self) -> usize {
        N
    }
}

/// Encodes `value` as JSON bytes.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| PortError::EncodeFailed { message: err.to_string() })
}

/// Decodes JSON bytes into `T`.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(PortError::decode)
}

/// Carries any serde type as a JSON-encoded payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Json<T>(pub T);

impl<T> Json<T> {
    /// Unwraps the carried value.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Json<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T> core::ops::Deref for Json<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> ByteMessage for Json<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn from_message_bytes(bytes: &[u8]) -> Result<Self> {
        decode_json(bytes).map(Json)
    }

    fn message_bytes(&self) -> Result<Cow<'_, [u8]>> {
        encode_json(&self.0).map(Cow::Owned)
    }
}

/// Implements [`ByteMessage`] for serde types by encoding them as JSON.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Tick { seq: u64 }
/// nexus_portmsg::json_message!(Tick);
/// ```
#[macro_export]
macro_rules! json_message {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::payload::ByteMessage for $ty {
                fn from_message_bytes(bytes: &[u8]) -> $crate::Result<Self> {
                    $crate::payload::decode_json(bytes)
                }

                fn message_bytes(&self) -> $crate::Result<::std::borrow::Cow<'_, [u8]>> {
                    $crate::payload::encode_json(self).map(::std::borrow::Cow::Owned)
                }
            }
        )+
    };
}
