// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Sending side of an endpoint
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 unit tests; end-to-end coverage in tests/
//!
//! A client resolves its endpoint once. A registry hit pins it to the in-process host (callback
//! runs synchronously, no framing, no kernel); a miss falls back to the kernel name service and
//! every send frames one packet. A local client whose host is gone reports `ReceiverGone`
//! instead of switching paths.

use std::sync::{Arc, Weak};

use crate::config::ClientConfig;
use crate::error::{PortError, Result};
use crate::framing::PacketLayout;
use crate::host::HostShared;
use crate::kernel::{PortKernel, PortName, TransportHeader, Wait};
use crate::logger::{emit, severity};
use crate::payload::Payload;
use crate::transport::Transport;

enum Route<M> {
    Local(Weak<HostShared<M>>),
    Remote(PortName),
}

/// Sends messages of type `M` to one named endpoint.
pub struct Client<M: Payload> {
    endpoint: String,
    route: Route<M>,
    kernel: Arc<dyn PortKernel>,
    config: ClientConfig,
}

/// Frames `payload` into a packet addressed to `remote`.
fn encode_packet(remote: PortName, payload: &[u8]) -> Result<Vec<u8>> {
    let layout = PacketLayout::for_payload(payload.len())?;
    let mut packet = layout.allocate()?;
    TransportHeader::copy_send(remote, layout.total_u32()).encode_into(&mut packet);
    layout.write_length(&mut packet);
    layout.write_payload(&mut packet, payload);
    Ok(packet)
}

impl<M: Payload> Client<M> {
    /// Resolves `endpoint` with the default configuration.
    pub fn new(transport: &Transport, endpoint: &str) -> Result<Self> {
        Self::with_config(transport, endpoint, ClientConfig::default())
    }

    /// Resolves `endpoint`, preferring a host in this process.
    pub fn with_config(
        transport: &Transport,
        endpoint: &str,
        config: ClientConfig,
    ) -> Result<Self> {
        let kernel = Arc::clone(transport.kernel());
        let route = match transport.registry().lookup::<HostShared<M>>(endpoint) {
            Some(host) => Route::Local(host),
            None => kernel.lookup_name(endpoint).map(Route::Remote).map_err(|source| {
                PortError::EndpointLookupFailed { endpoint: endpoint.to_owned(), source }
            })?,
        };
        emit(config.logger.as_ref(), severity::DEBUG, || match &route {
            Route::Local(_) => format!("client for '{endpoint}' resolved in process"),
            Route::Remote(port) => format!("client for '{endpoint}' resolved to {port}"),
        });
        Ok(Self { endpoint: endpoint.to_owned(), route, kernel, config })
    }

    /// Delivers `message` to the endpoint.
    pub fn send(&self, message: M) -> Result<()> {
        match &self.route {
            Route::Local(host) => {
                let host = host
                    .upgrade()
                    .ok_or_else(|| PortError::ReceiverGone { endpoint: self.endpoint.clone() })?;
                host.deliver_local(message);
                Ok(())
            }
            Route::Remote(port) => self.send_remote(*port, &message),
        }
    }

    fn send_remote(&self, port: PortName, message: &M) -> Result<()> {
        let packet = message.with_payload(|payload| encode_packet(port, payload))??;
        self.kernel
            .send(&packet, Wait::from_timeout(self.config.send_timeout()))
            .map_err(PortError::send_failed)?;
        emit(self.config.logger.as_ref(), severity::DEBUG, || {
            format!("sent {} byte packet to '{}'", packet.len(), self.endpoint)
        });
        Ok(())
    }

    /// Whether sends bypass the kernel.
    pub fn is_local(&self) -> bool {
        matches!(self.route, Route::Local(_))
    }

    /// Endpoint this client sends to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl<M: Payload> Drop for Client<M> {
    fn drop(&mut self) {
        if let Route::Remote(port) = self.route {
            self.kernel.release(port);
        }
    }
}

impl<M: Payload> core::fmt::Debug for Client<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let route = match &self.route {
            Route::Local(_) => "local".to_string(),
            Route::Remote(port) => port.to_string(),
        };
        f.debug_struct("Client").field("endpoint", &self.endpoint).field("route", &route).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{read_payload, ALIGNMENT};
    use crate::kernel::loopback::LoopbackKernel;
    use crate::registry::EndpointRegistry;
    use std::time::Duration;

    #[test]
    fn packets_carry_header_length_and_padding() {
        let port = PortName::new(0x103);
        let packet = encode_packet(port, b"hello").unwrap();
        assert_eq!(packet.len() % ALIGNMENT, 0);
        let header = TransportHeader::decode(&packet).unwrap();
        assert_eq!(header, TransportHeader::copy_send(port, packet.len() as u32));
        assert_eq!(read_payload(&packet).unwrap(), b"hello");
    }

    #[test]
    fn remote_client_frames_into_kernel_queue() {
        let kernel = Arc::new(LoopbackKernel::new());
        let transport = Transport::new(Arc::new(EndpointRegistry::new()), kernel.clone());
        let port = kernel.register_name("svc.raw").unwrap();
        let client = Client::<Vec<u8>>::with_config(
            &transport,
            "svc.raw",
            ClientConfig::default().with_logger(None),
        )
        .unwrap();
        assert!(!client.is_local());
        client.send(vec![1, 2, 3]).unwrap();
        assert_eq!(kernel.queued(port), Some(1));

        let mut buf = vec![0u8; 64];
        let header = kernel.receive(port, &mut buf, Wait::NonBlocking).unwrap();
        assert_eq!(read_payload(&buf[..header.size as usize]).unwrap(), &[1, 2, 3]);
    }

    #[test]
    fn bounded_send_fails_on_full_queue() {
        let kernel = Arc::new(LoopbackKernel::with_queue_capacity(1));
        let transport = Transport::new(Arc::new(EndpointRegistry::new()), kernel.clone());
        let _port = kernel.register_name("svc.bounded").unwrap();
        let config = ClientConfig::default()
            .with_logger(None)
            .with_send_timeout(Some(Duration::from_millis(20)));
        let client = Client::<String>::with_config(&transport, "svc.bounded", config).unwrap();
        client.send("first".into()).unwrap();
        let err = client.send("second".into()).unwrap_err();
        assert!(matches!(err, PortError::SendFailed { code: 0x1000_0004, .. }));
        drop(client);
        assert_eq!(kernel.traffic().sent, 1);
    }
}
