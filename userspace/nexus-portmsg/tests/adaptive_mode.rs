// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Integration tests for the rate-driven receive mode
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 2 integration tests
//!
//! TEST_SCENARIOS:
//!   - sustained_load_switches_to_polling_and_back(): remote load above the threshold flips the
//!     host into high-performance mode; silence flips it back
//!   - throughput_lines_include_local_deliveries(): log_throughput reports both paths per window
//!
//! Windows are one second long, so each test takes a few seconds of wall time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nexus_portmsg::{Client, ClientConfig, Host, HostConfig, SharedLogger, Transport};
use parking_lot::Mutex;

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn sustained_load_switches_to_polling_and_back() {
    let transport = Transport::loopback();
    transport.registry().set_lookup_enabled(false);
    let config = HostConfig::default().with_logger(None).with_high_performance_threshold(50);
    let host = Host::<Vec<u8>>::new(&transport, "svc.adaptive", config, |_| {}).unwrap();
    assert!(!host.is_high_performance());

    let client = Client::<Vec<u8>>::with_config(
        &transport,
        "svc.adaptive",
        ClientConfig::default().with_logger(None),
    )
    .unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let sender = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                client.send(vec![0u8; 16]).unwrap();
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    let entered = wait_until(Duration::from_secs(6), || host.is_high_performance());
    stop.store(true, Ordering::Relaxed);
    sender.join().unwrap();
    assert!(entered, "host never entered high-performance mode");
    assert!(host.stats().remote_deliveries > 50);

    assert!(
        wait_until(Duration::from_secs(6), || !host.is_high_performance()),
        "host stayed in high-performance mode while idle"
    );
}

#[test]
fn throughput_lines_include_local_deliveries() {
    let lines = Arc::new(Mutex::new(Vec::<String>::new()));
    let logger: SharedLogger = {
        let lines = Arc::clone(&lines);
        Arc::new(move |_severity: i32, message: &str| lines.lock().push(message.to_owned()))
    };
    let transport = Transport::loopback();
    let config = HostConfig::default().with_logger(Some(logger)).with_log_throughput(true);
    let host = Host::<String>::new(&transport, "svc.rates", config, |_| {}).unwrap();

    let client = Client::<String>::with_config(
        &transport,
        "svc.rates",
        ClientConfig::default().with_logger(None),
    )
    .unwrap();
    assert!(client.is_local());
    for _ in 0..3 {
        client.send("tick".into()).unwrap();
    }

    let reported = wait_until(Duration::from_secs(5), || {
        lines.lock().iter().any(|line| line.contains("3 delivered locally"))
    });
    assert!(reported, "no throughput line: {:?}", lines.lock());
    assert!(lines.lock().iter().any(|line| line.contains("svc.rates")));
    assert!(!host.is_high_performance());
}
