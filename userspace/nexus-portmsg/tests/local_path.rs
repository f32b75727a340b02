// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for in-process endpoint resolution and delivery
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 7 integration tests
//!
//! TEST_SCOPE:
//!   - Registry hit pins a client to the local host; no packet reaches the kernel
//!   - Weak registry entries go stale when the host is dropped
//!   - Name collisions and dead local receivers are reported, not rerouted
//!
//! TEST_SCENARIOS:
//!   - echo_ping_delivered_once(): "ping" to svc.echo runs the callback exactly once
//!   - burst_stays_off_the_kernel(): N local sends, zero kernel traffic, sender order kept
//!   - resolved_client_survives_lookup_switch(): disabling lookup later keeps the local route
//!   - dropped_host_is_not_resolvable(): no explicit unregister needed
//!   - dropped_local_host_reports_receiver_gone(): no silent fallback to the kernel
//!   - second_host_on_same_name_rejected(): EndpointAlreadyRegistered
//!   - unregister_forces_kernel_route(): explicit removal sends new clients through the kernel

use std::sync::Arc;
use std::time::{Duration, Instant};

use nexus_portmsg::{
    Client, ClientConfig, EndpointRegistry, Host, HostConfig, LoopbackKernel, PortError,
    Transport,
};
use parking_lot::Mutex;

fn quiet_host() -> HostConfig {
    HostConfig::default().with_logger(None)
}

fn quiet_client() -> ClientConfig {
    ClientConfig::default().with_logger(None)
}

fn counted_transport() -> (Transport, Arc<LoopbackKernel>) {
    let kernel = Arc::new(LoopbackKernel::new());
    (Transport::new(Arc::new(EndpointRegistry::new()), kernel.clone()), kernel)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}

#[test]
fn echo_ping_delivered_once() {
    let (transport, kernel) = counted_transport();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _host = Host::<String>::new(&transport, "svc.echo", quiet_host(), move |message| {
        sink.lock().push(message)
    })
    .unwrap();

    let client = Client::<String>::with_config(&transport, "svc.echo", quiet_client()).unwrap();
    assert!(client.is_local());
    client.send("ping".into()).unwrap();

    // Local delivery is synchronous: the callback has run before send returns.
    assert_eq!(seen.lock().as_slice(), &["ping".to_string()]);
    assert_eq!(kernel.traffic().sent, 0);
}

#[test]
fn burst_stays_off_the_kernel() {
    let (transport, kernel) = counted_transport();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let host = Host::<Vec<u8>>::new(&transport, "svc.burst", quiet_host(), move |message| {
        sink.lock().push(message)
    })
    .unwrap();

    let client = Client::<Vec<u8>>::with_config(&transport, "svc.burst", quiet_client()).unwrap();
    for i in 0..1000u32 {
        client.send(i.to_le_bytes().to_vec()).unwrap();
    }

    let expected: Vec<Vec<u8>> = (0..1000u32).map(|i| i.to_le_bytes().to_vec()).collect();
    assert_eq!(*seen.lock(), expected);
    assert_eq!(host.stats().local_deliveries, 1000);
    assert_eq!(host.stats().remote_deliveries, 0);
    assert_eq!(kernel.traffic().sent, 0);
    assert_eq!(kernel.traffic().received, 0);
}

#[test]
fn resolved_client_survives_lookup_switch() {
    let (transport, kernel) = counted_transport();
    let seen = Arc::new(Mutex::new(0u32));
    let sink = Arc::clone(&seen);
    let _host = Host::<String>::new(&transport, "svc.switch", quiet_host(), move |_| {
        *sink.lock() += 1
    })
    .unwrap();

    let local = Client::<String>::with_config(&transport, "svc.switch", quiet_client()).unwrap();
    transport.registry().set_lookup_enabled(false);
    local.send("still local".into()).unwrap();
    assert!(local.is_local());
    assert_eq!(kernel.traffic().sent, 0);

    let remote = Client::<String>::with_config(&transport, "svc.switch", quiet_client()).unwrap();
    assert!(!remote.is_local());
    remote.send("through the kernel".into()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || *seen.lock() == 2));
    assert_eq!(kernel.traffic().sent, 1);
}

#[test]
fn dropped_host_is_not_resolvable() {
    let transport = Transport::loopback();
    let host = Host::<String>::new(&transport, "svc.short", quiet_host(), |_| {}).unwrap();
    assert_eq!(transport.registry().len(), 1);
    drop(host);

    assert!(transport.registry().is_empty());
    let err = Client::<String>::with_config(&transport, "svc.short", quiet_client()).unwrap_err();
    assert!(matches!(err, PortError::EndpointLookupFailed { .. }));
}

#[test]
fn dropped_local_host_reports_receiver_gone() {
    let (transport, kernel) = counted_transport();
    let host = Host::<String>::new(&transport, "svc.gone", quiet_host(), |_| {}).unwrap();
    let client = Client::<String>::with_config(&transport, "svc.gone", quiet_client()).unwrap();
    drop(host);

    let err = client.send("late".into()).unwrap_err();
    assert!(matches!(err, PortError::ReceiverGone { ref endpoint } if endpoint == "svc.gone"));
    assert_eq!(kernel.traffic().sent, 0);
}

#[test]
fn second_host_on_same_name_rejected() {
    let transport = Transport::loopback();
    let _first = Host::<String>::new(&transport, "svc.once", quiet_host(), |_| {}).unwrap();
    let err = Host::<String>::new(&transport, "svc.once", quiet_host(), |_| {}).unwrap_err();
    match err {
        PortError::EndpointAlreadyRegistered { endpoint } => assert_eq!(endpoint, "svc.once"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn unregister_forces_kernel_route() {
    let transport = Transport::loopback();
    let host = Host::<String>::new(&transport, "svc.hidden", quiet_host(), |_| {}).unwrap();
    host.unregister();
    assert!(transport.registry().is_empty());
    let client = Client::<String>::with_config(&transport, "svc.hidden", quiet_client()).unwrap();
    assert!(!client.is_local());
}
