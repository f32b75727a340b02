// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for file-based configuration and log sinks
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCENARIOS:
//!   - host_starts_from_config_file(): TOML files drive a host and client that deliver a message
//!   - invalid_config_rejected_by_host(): InvalidConfig before any registration
//!   - lifecycle_lines_reach_the_sink(): INFO start/stop lines through a closure sink

use std::fs;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nexus_portmsg::logger::severity;
use nexus_portmsg::{Client, ClientConfig, Host, HostConfig, PortError, SharedLogger, Transport};
use parking_lot::Mutex;

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
fn host_starts_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("host.toml");
    fs::write(
        &path,
        "buffer_size = 4096\nhigh_performance_threshold = 1000\nlog_throughput = false\n",
    )
    .unwrap();

    let config = HostConfig::load(&path).unwrap().with_logger(None);
    let transport = Transport::loopback();
    transport.registry().set_lookup_enabled(false);
    let seen = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let sink = Arc::clone(&seen);
    let host =
        Host::<Vec<u8>>::new(&transport, "svc.cfg", config, move |message| sink.lock().push(message))
            .unwrap();
    assert_eq!(host.config().buffer_size, 4096);
    assert_eq!(host.config().high_performance_threshold, 1000);

    let client_path = dir.path().join("client.toml");
    fs::write(&client_path, "send_timeout_ms = 100\n").unwrap();
    let client_config = ClientConfig::load(&client_path).unwrap().with_logger(None);
    let client = Client::<Vec<u8>>::with_config(&transport, "svc.cfg", client_config).unwrap();
    assert!(!client.is_local());
    client.send(vec![7u8; 1024]).unwrap();

    assert!(wait_until(Duration::from_secs(5), || seen.lock().len() == 1));
    assert_eq!(seen.lock()[0], vec![7u8; 1024]);
    assert_eq!(host.stats().remote_deliveries, 1);
}

#[test]
fn invalid_config_rejected_by_host() {
    let transport = Transport::loopback();
    let config = HostConfig::default().with_logger(None).with_buffer_size(16);
    let err = Host::<String>::new(&transport, "svc.bad", config, |_| {}).unwrap_err();
    assert!(matches!(err, PortError::InvalidConfig(_)));
    // The name was never taken.
    let _host =
        Host::<String>::new(&transport, "svc.bad", HostConfig::default().with_logger(None), |_| {})
            .unwrap();
}

#[test]
fn lifecycle_lines_reach_the_sink() {
    let lines = Arc::new(Mutex::new(Vec::<(i32, String)>::new()));
    let logger: SharedLogger = {
        let lines = Arc::clone(&lines);
        Arc::new(move |level: i32, message: &str| lines.lock().push((level, message.to_owned())))
    };
    let transport = Transport::loopback();
    let host = Host::<String>::new(
        &transport,
        "svc.logged",
        HostConfig::default().with_logger(Some(logger)),
        |_| {},
    )
    .unwrap();
    drop(host);

    let lines = lines.lock();
    assert!(lines
        .iter()
        .any(|(level, line)| *level == severity::INFO && line.contains("listening on port#")));
    assert!(lines.iter().any(|(_, line)| line.contains("receive loop stopped")));
}
