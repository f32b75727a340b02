// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Named-endpoint messaging over port IPC with an in-process fast path
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests per module + integration tests in tests/
//!
//! PUBLIC API:
//!   - Host: registers an endpoint and receives on a dedicated, rate-adaptive thread
//!   - Client: resolves an endpoint once and sends, locally or through the kernel
//!   - Transport: the registry + kernel pair hosts and clients share
//!   - Payload / ByteMessage / Json: message capability tiers
//!   - HostConfig / ClientConfig: tuning, loadable from TOML
//!
//! DEPENDENCIES:
//!   - nexus-sync: ExclusiveLock guarding the endpoint registry
//!   - parking_lot: loopback kernel queues
//!   - serde / serde_json / toml: structured payloads and configuration
//!   - log: LogFacade sink
//!   - libc: receive thread priority
//!
//! ```no_run
//! use nexus_portmsg::{Client, Host, HostConfig, Transport};
//!
//! let transport = Transport::loopback();
//! let _host = Host::<String>::new(&transport, "svc.echo", HostConfig::default(), |msg| {
//!     println!("got {msg}");
//! })?;
//! Client::<String>::new(&transport, "svc.echo")?.send("ping".into())?;
//! # Ok::<(), nexus_portmsg::PortError>(())
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod host;
pub mod kernel;
pub mod logger;
pub mod payload;
pub mod priority;
pub mod registry;
pub mod speed;
pub mod transport;

pub use client::Client;
pub use config::{ClientConfig, ConfigError, HostConfig};
pub use error::{PortError, Result};
pub use host::{Host, HostStatsSnapshot, IDLE_RECEIVE_TIMEOUT};
pub use kernel::loopback::LoopbackKernel;
#[cfg(all(unix, feature = "unix-backend"))]
pub use kernel::unix::UnixKernel;
pub use kernel::{KernelError, PortKernel, PortName, TransportHeader, Wait};
pub use logger::{ConsoleLogger, LogFacade, Logger, SharedLogger};
pub use payload::{ByteMessage, Json, Payload};
pub use registry::EndpointRegistry;
pub use speed::SpeedMeter;
pub use transport::Transport;
