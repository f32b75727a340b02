// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: In-process port kernel emulation for host-based testing
//!
//! OWNERS: @runtime
//!
//! PUBLIC API:
//!   - struct LoopbackKernel: PortKernel backed by in-memory bounded queues
//!   - LoopbackKernel::with_queue_capacity(): per-port queue bound
//!   - LoopbackKernel::traffic(): packet counters for assertions
//!
//! SECURITY INVARIANTS:
//!   - No unsafe code
//!   - Packets are copied on send; receivers never alias sender memory
//!   - Packet boundaries are preserved
//!
//! ERROR CONDITIONS:
//!   - KernelError::AlreadyRegistered: name has a live receive right
//!   - KernelError::NotFound: lookup of an unknown name
//!   - KernelError::TimedOut: wait budget exhausted (queue empty on receive, full on send)
//!   - KernelError::PortDead: receive right released
//!   - KernelError::TooLarge: packet larger than the receive buffer (packet dropped)
//!
//! DEPENDENCIES:
//!   - parking_lot::{Mutex, Condvar}: queue state and wakeups

#![forbid(unsafe_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::{validate_outgoing, KernelError, PortKernel, PortName, TransportHeader, Wait};

/// Default number of packets a receive right can hold before senders wait.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

// Right names start above the small reserved range, like task-local port names do.
const FIRST_PORT_NAME: u32 = 0x103;

/// Packet counters of a [`LoopbackKernel`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Traffic {
    /// Packets accepted by `send`.
    pub sent: u64,
    /// Packets handed out by `receive`.
    pub received: u64,
}

/// Port kernel living entirely inside the current process.
pub struct LoopbackKernel {
    table: Mutex<PortTable>,
    queue_capacity: usize,
    sent: AtomicU64,
    received: AtomicU64,
}

struct PortTable {
    names: HashMap<String, Arc<PortQueue>>,
    rights: HashMap<PortName, Right>,
    next_name: u32,
}

enum Right {
    Receive(Arc<PortQueue>),
    Send(Arc<PortQueue>),
}

struct PortQueue {
    state: Mutex<QueueState>,
    readable: Condvar,
    writable: Condvar,
}

struct QueueState {
    packets: VecDeque<Vec<u8>>,
    dead: bool,
}

impl PortQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState { packets: VecDeque::new(), dead: false }),
            readable: Condvar::new(),
            writable: Condvar::new(),
        }
    }

    fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    fn kill(&self) {
        let mut state = self.state.lock();
        state.dead = true;
        state.packets.clear();
        drop(state);
        self.readable.notify_all();
        self.writable.notify_all();
    }
}

impl PortTable {
    fn allocate(&mut self, right: Right) -> PortName {
        let name = PortName::new(self.next_name);
        self.next_name = self.next_name.wrapping_add(1).max(FIRST_PORT_NAME);
        self.rights.insert(name, right);
        name
    }
}

impl Default for LoopbackKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackKernel {
    /// Creates an empty kernel with [`DEFAULT_QUEUE_CAPACITY`] per port.
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an empty kernel whose ports hold at most `capacity` packets (minimum 1).
    pub fn with_queue_capacity(capacity: usize) -> Self {
        Self {
            table: Mutex::new(PortTable {
                names: HashMap::new(),
                rights: HashMap::new(),
                next_name: FIRST_PORT_NAME,
            }),
            queue_capacity: capacity.max(1),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
        }
    }

    /// Packets moved through this kernel so far.
    pub fn traffic(&self) -> Traffic {
        Traffic {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
        }
    }

    /// Number of packets waiting on `port`, or `None` if it is not a live right.
    pub fn queued(&self, port: PortName) -> Option<usize> {
        let queue = self.queue_for(port, false).ok()?;
        let state = queue.state.lock();
        Some(state.packets.len())
    }

    fn queue_for(&self, port: PortName, receive_only: bool) -> Result<Arc<PortQueue>, KernelError> {
        let table = self.table.lock();
        match table.rights.get(&port) {
            Some(Right::Receive(queue)) => Ok(Arc::clone(queue)),
            Some(Right::Send(queue)) if !receive_only => Ok(Arc::clone(queue)),
            _ => Err(KernelError::InvalidRight(port)),
        }
    }
}

fn wait_on(
    condvar: &Condvar,
    state: &mut MutexGuard<'_, QueueState>,
    wait: Wait,
    deadline: &mut Option<Instant>,
) -> Result<(), KernelError> {
    match wait {
        Wait::NonBlocking => Err(KernelError::TimedOut),
        Wait::Blocking => {
            condvar.wait(state);
            Ok(())
        }
        Wait::Timeout(timeout) => {
            let at = *deadline.get_or_insert_with(|| Instant::now() + timeout);
            if Instant::now() >= at {
                return Err(KernelError::TimedOut);
            }
            // Spurious or late wakeups loop back to the caller's condition check.
            let _ = condvar.wait_until(state, at);
            Ok(())
        }
    }
}

impl PortKernel for LoopbackKernel {
    fn register_name(&self, name: &str) -> Result<PortName, KernelError> {
        if name.is_empty() {
            return Err(KernelError::InvalidServiceName);
        }
        let key = name.to_owned();
        let mut table = self.table.lock();
        if table.names.get(name).is_some_and(|queue| !queue.is_dead()) {
            return Err(KernelError::AlreadyRegistered);
        }
        let queue = Arc::new(PortQueue::new());
        table.names.insert(key, Arc::clone(&queue));
        Ok(table.allocate(Right::Receive(queue)))
    }

    fn lookup_name(&self, name: &str) -> Result<PortName, KernelError> {
        let mut table = self.table.lock();
        let queue = match table.names.get(name) {
            Some(queue) if !queue.is_dead() => Arc::clone(queue),
            _ => return Err(KernelError::NotFound),
        };
        Ok(table.allocate(Right::Send(queue)))
    }

    fn receive(
        &self,
        port: PortName,
        buf: &mut [u8],
        wait: Wait,
    ) -> Result<TransportHeader, KernelError> {
        let queue = self.queue_for(port, true)?;
        let mut deadline = None;
        let mut state = queue.state.lock();
        let packet = loop {
            if let Some(packet) = state.packets.pop_front() {
                break packet;
            }
            if state.dead {
                return Err(KernelError::PortDead);
            }
            wait_on(&queue.readable, &mut state, wait, &mut deadline)?;
        };
        drop(state);
        queue.writable.notify_one();
        self.received.fetch_add(1, Ordering::Relaxed);

        if packet.len() > buf.len() {
            return Err(KernelError::TooLarge { size: packet.len(), capacity: buf.len() });
        }
        buf[..packet.len()].copy_from_slice(&packet);
        TransportHeader::decode(&packet)
    }

    fn send(&self, packet: &[u8], wait: Wait) -> Result<(), KernelError> {
        let header = validate_outgoing(packet)?;
        let queue = self.queue_for(header.remote, false)?;
        let owned = packet.to_vec();
        let mut deadline = None;
        let mut state = queue.state.lock();
        loop {
            if state.dead {
                return Err(KernelError::PortDead);
            }
            if state.packets.len() < self.queue_capacity {
                break;
            }
            wait_on(&queue.writable, &mut state, wait, &mut deadline)?;
        }
        state.packets.push_back(owned);
        drop(state);
        queue.readable.notify_one();
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn release(&self, port: PortName) {
        let mut table = self.table.lock();
        let Some(right) = table.rights.remove(&port) else {
            return;
        };
        if let Right::Receive(queue) = right {
            let registered = table
                .names
                .iter()
                .find(|(_, candidate)| Arc::ptr_eq(candidate, &queue))
                .map(|(name, _)| name.clone());
            if let Some(name) = registered {
                table.names.remove(&name);
            }
            drop(table);
            queue.kill();
        }
    }
}
