// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Named endpoint with a dedicated, self-tuning receive thread
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 unit tests; end-to-end coverage in tests/
//!
//! PUBLIC API:
//!   - Host::new(transport, endpoint, config, on_receive)
//!   - Host::is_high_performance(), Host::stats(), Host::unregister()
//!
//! RECEIVE LOOP:
//!   - Polls (zero timeout) while the measured rate exceeds the configured threshold, otherwise
//!     blocks for up to IDLE_RECEIVE_TIMEOUT per call
//!   - Decode failures and kernel errors are counted and logged; only a dead port ends the loop
//!   - Local deliveries run on the sender's thread and never influence the mode
//!
//! SHUTDOWN:
//!   - Drop raises the stop flag, releases the receive right (waking the loop) and joins the
//!     thread; the registry entry goes stale with the last strong handle

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::HostConfig;
use crate::error::{PortError, Result};
use crate::framing;
use crate::kernel::{KernelError, PortKernel, PortName, TransportHeader, Wait};
use crate::logger::{emit, severity, SharedLogger};
use crate::payload::Payload;
use crate::priority;
use crate::registry::EndpointRegistry;
use crate::speed::SpeedMeter;
use crate::transport::Transport;

/// Longest single wait of an idle receive loop.
pub const IDLE_RECEIVE_TIMEOUT: Duration = Duration::from_millis(1000);

const RECEIVE_THREAD_NAME: &str = "portmsg-host-receive";

#[derive(Debug, Default)]
struct HostStats {
    remote_deliveries: AtomicU64,
    local_deliveries: AtomicU64,
    decode_failures: AtomicU64,
    receive_errors: AtomicU64,
}

impl HostStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HostStatsSnapshot {
        HostStatsSnapshot {
            remote_deliveries: self.remote_deliveries.load(Ordering::Relaxed),
            local_deliveries: self.local_deliveries.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a host's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HostStatsSnapshot {
    /// Messages decoded and delivered by the receive thread.
    pub remote_deliveries: u64,
    /// Messages delivered on sender threads through the in-process path.
    pub local_deliveries: u64,
    /// Packets whose payload could not be decoded.
    pub decode_failures: u64,
    /// Kernel receive failures other than timeouts.
    pub receive_errors: u64,
}

/// State shared between a host, its receive thread and local clients.
pub(crate) struct HostShared<M> {
    endpoint: String,
    on_receive: Box<dyn Fn(M) + Send + Sync>,
    logger: Option<SharedLogger>,
    log_throughput: bool,
    high_performance: AtomicBool,
    local_window: AtomicU64,
    stats: HostStats,
}

impl<M> HostShared<M> {
    /// Runs the callback on the calling thread.
    pub(crate) fn deliver_local(&self, message: M) {
        HostStats::bump(&self.stats.local_deliveries);
        if self.log_throughput {
            self.local_window.fetch_add(1, Ordering::Relaxed);
        }
        (self.on_receive)(message);
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

struct ReceiveLoop<M> {
    shared: Arc<HostShared<M>>,
    kernel: Arc<dyn PortKernel>,
    port: PortName,
    buffer: Vec<u8>,
    stop: Arc<AtomicBool>,
    meter: SpeedMeter,
    threshold: u64,
    priority: Option<i32>,
}

impl<M: Payload> ReceiveLoop<M> {
    fn run(mut self) {
        if let Some(priority) = self.priority {
            if let Err(err) = priority::set_current_thread_priority(priority) {
                self.log(severity::WARN, || {
                    format!("thread priority {priority} not applied: {err}")
                });
            }
        }
        while !self.stop.load(Ordering::Acquire) {
            let wait = if self.shared.high_performance.load(Ordering::Relaxed) {
                Wait::NonBlocking
            } else {
                Wait::Timeout(IDLE_RECEIVE_TIMEOUT)
            };
            match self.kernel.receive(self.port, &mut self.buffer, wait) {
                Ok(header) => self.dispatch(header),
                Err(KernelError::TimedOut) => {
                    if wait.is_non_blocking() {
                        core::hint::spin_loop();
                    }
                }
                Err(KernelError::PortDead | KernelError::InvalidRight(_)) => break,
                Err(err) => {
                    HostStats::bump(&self.shared.stats.receive_errors);
                    self.log(severity::ERROR, || format!("receive failed: {err}"));
                }
            }
            self.sample();
        }
        self.log(severity::INFO, || "receive loop stopped".to_string());
    }

    fn dispatch(&mut self, header: TransportHeader) {
        self.meter.track(1);
        let valid = (header.size as usize).min(self.buffer.len());
        let decoded = framing::read_payload(&self.buffer[..valid]).and_then(M::from_payload);
        match decoded {
            Ok(message) => {
                HostStats::bump(&self.shared.stats.remote_deliveries);
                (self.shared.on_receive)(message);
            }
            Err(err) => {
                HostStats::bump(&self.shared.stats.decode_failures);
                self.log(severity::ERROR, || format!("dropping undecodable packet: {err}"));
            }
        }
    }

    fn sample(&mut self) {
        let Some(rate) = self.meter.collect() else {
            return;
        };
        if self.shared.log_throughput {
            let local = self.shared.local_window.swap(0, Ordering::Relaxed);
            self.log(severity::INFO, || {
                format!("{rate} msg/s received, {local} delivered locally")
            });
        }
        let fast = rate > self.threshold;
        if self.shared.high_performance.swap(fast, Ordering::Relaxed) != fast {
            self.log(severity::DEBUG, || {
                format!("{} mode at {rate} msg/s", if fast { "high-performance" } else { "idle" })
            });
        }
    }

    fn log(&self, level: i32, message: impl FnOnce() -> String) {
        emit(self.shared.logger.as_ref(), level, || {
            format!("host '{}': {}", self.shared.endpoint, message())
        });
    }
}

fn allocate_buffer(size: usize) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(size).map_err(|_| PortError::AllocationFailed { size })?;
    buffer.resize(size, 0);
    Ok(buffer)
}

/// Endpoint that receives messages of type `M` on a dedicated thread.
pub struct Host<M: Payload> {
    shared: Arc<HostShared<M>>,
    kernel: Arc<dyn PortKernel>,
    registry: Arc<EndpointRegistry>,
    port: PortName,
    config: HostConfig,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl<M: Payload> Host<M> {
    /// Registers `endpoint` and starts receiving; `on_receive` runs once per delivered message.
    ///
    /// Remote messages are delivered on the receive thread, local ones on the sending thread,
    /// so the callback must tolerate concurrent calls.
    pub fn new<F>(
        transport: &Transport,
        endpoint: &str,
        config: HostConfig,
        on_receive: F,
    ) -> Result<Self>
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        config.validate().map_err(|err| PortError::InvalidConfig(err.to_string()))?;
        let kernel = Arc::clone(transport.kernel());
        let port = kernel.register_name(endpoint).map_err(|source| match source {
            KernelError::AlreadyRegistered => {
                PortError::EndpointAlreadyRegistered { endpoint: endpoint.to_owned() }
            }
            source => PortError::Registration { endpoint: endpoint.to_owned(), source },
        })?;
        let buffer = match allocate_buffer(config.buffer_size) {
            Ok(buffer) => buffer,
            Err(err) => {
                kernel.release(port);
                return Err(err);
            }
        };

        let shared = Arc::new(HostShared {
            endpoint: endpoint.to_owned(),
            on_receive: Box::new(on_receive),
            logger: config.logger.clone(),
            log_throughput: config.log_throughput,
            high_performance: AtomicBool::new(false),
            local_window: AtomicU64::new(0),
            stats: HostStats::default(),
        });
        let stop = Arc::new(AtomicBool::new(false));
        let receive_loop = ReceiveLoop {
            shared: Arc::clone(&shared),
            kernel: Arc::clone(&kernel),
            port,
            buffer,
            stop: Arc::clone(&stop),
            meter: SpeedMeter::new(),
            threshold: config.high_performance_threshold,
            priority: config.thread_priority,
        };
        let spawned = thread::Builder::new()
            .name(RECEIVE_THREAD_NAME.into())
            .spawn(move || receive_loop.run());
        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                kernel.release(port);
                return Err(PortError::ThreadSpawn(err));
            }
        };

        let registry = Arc::clone(transport.registry());
        registry.register(endpoint, &shared);
        emit(config.logger.as_ref(), severity::INFO, || {
            format!("host '{endpoint}' listening on {port}")
        });
        Ok(Self { shared, kernel, registry, port, config, stop, thread: Some(thread) })
    }

    /// Endpoint name this host answers to.
    pub fn endpoint(&self) -> &str {
        self.shared.endpoint()
    }

    /// Receive right held by this host.
    pub fn port(&self) -> PortName {
        self.port
    }

    /// Configuration the host was started with.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Whether the receive loop is currently polling.
    pub fn is_high_performance(&self) -> bool {
        self.shared.high_performance.load(Ordering::Relaxed)
    }

    /// Current counters.
    pub fn stats(&self) -> HostStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Removes the endpoint from the registry; new clients resolve through the kernel.
    pub fn unregister(&self) {
        self.registry.unregister(self.endpoint());
    }
}

impl<M: Payload> Drop for Host<M> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.kernel.release(self.port);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            emit(self.shared.logger.as_ref(), severity::ERROR, || {
                format!("host '{}': receive thread panicked", self.shared.endpoint)
            });
        }
    }
}

impl<M: Payload> core::fmt::Debug for Host<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Host")
            .field("endpoint", &self.shared.endpoint)
            .field("port", &self.port)
            .field("high_performance", &self.is_high_performance())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn quiet() -> HostConfig {
        HostConfig::default().with_logger(None)
    }

    #[test]
    fn invalid_buffer_rejected_before_registration() {
        let transport = Transport::loopback();
        let err = Host::<Vec<u8>>::new(&transport, "svc.tiny", quiet().with_buffer_size(8), |_| {})
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidConfig(_)));
        assert!(transport.kernel().lookup_name("svc.tiny").is_err());
    }

    #[test]
    fn drop_releases_name_and_registry_entry() {
        let transport = Transport::loopback();
        let host = Host::<Vec<u8>>::new(&transport, "svc.drop", quiet(), |_| {}).unwrap();
        assert_eq!(host.endpoint(), "svc.drop");
        assert!(!host.port().is_null());
        assert_eq!(transport.registry().len(), 1);
        drop(host);
        assert!(transport.registry().is_empty());
        assert_eq!(transport.kernel().lookup_name("svc.drop"), Err(KernelError::NotFound));
    }

    #[test]
    fn local_delivery_counts_without_mode_change() {
        let transport = Transport::loopback();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let host = Host::<String>::new(
            &transport,
            "svc.count",
            quiet().with_log_throughput(true).with_high_performance_threshold(0),
            move |message| sink.lock().push(message),
        )
        .unwrap();
        let shared = transport
            .registry()
            .lookup::<HostShared<String>>("svc.count")
            .and_then(|weak| weak.upgrade())
            .unwrap();
        for i in 0..5 {
            shared.deliver_local(format!("m{i}"));
        }
        assert_eq!(seen.lock().len(), 5);
        assert_eq!(host.stats().local_deliveries, 5);
        assert_eq!(host.stats().remote_deliveries, 0);
        assert!(!host.is_high_performance());
    }
}
