// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared context handed to hosts and clients: the endpoint registry plus the kernel backend.

use std::fmt;
use std::sync::Arc;

use crate::kernel::loopback::LoopbackKernel;
use crate::kernel::PortKernel;
use crate::registry::EndpointRegistry;

/// Registry and kernel shared by every host and client that should see each other.
#[derive(Clone)]
pub struct Transport {
    registry: Arc<EndpointRegistry>,
    kernel: Arc<dyn PortKernel>,
}

impl Transport {
    /// Bundles an existing registry and kernel.
    pub fn new(registry: Arc<EndpointRegistry>, kernel: Arc<dyn PortKernel>) -> Self {
        Self { registry, kernel }
    }

    /// Fresh registry over a fresh in-process kernel.
    pub fn loopback() -> Self {
        Self::new(Arc::new(EndpointRegistry::new()), Arc::new(LoopbackKernel::new()))
    }

    /// Fresh registry over Unix datagram sockets in `namespace`.
    #[cfg(all(unix, feature = "unix-backend"))]
    pub fn unix(namespace: impl Into<std::path::PathBuf>) -> std::io::Result<Self> {
        let kernel = crate::kernel::unix::UnixKernel::new(namespace)?;
        Ok(Self::new(Arc::new(EndpointRegistry::new()), Arc::new(kernel)))
    }

    /// Endpoint registry used for in-process resolution.
    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Kernel backend used for the framed path.
    pub fn kernel(&self) -> &Arc<dyn PortKernel> {
        &self.kernel
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport").field("registry", &self.registry).finish_non_exhaustive()
    }
}
