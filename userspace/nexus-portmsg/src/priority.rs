// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Best-effort scheduling priority for receive threads.
//!
//! Higher values mean more urgent. On Linux the value maps onto the calling thread's nice level
//! (`nice = -priority`, clamped to `-20..=19`); raising urgency usually needs privileges.

#![allow(unsafe_code)]

use std::io;

/// Lowest nice level accepted by the scheduler.
pub const MIN_NICE: i32 = -20;
/// Highest nice level accepted by the scheduler.
pub const MAX_NICE: i32 = 19;

/// Nice level used for `priority`.
pub fn nice_for(priority: i32) -> i32 {
    priority.saturating_neg().clamp(MIN_NICE, MAX_NICE)
}

/// Applies `priority` to the calling thread.
#[cfg(target_os = "linux")]
pub fn set_current_thread_priority(priority: i32) -> io::Result<()> {
    // SAFETY: gettid has no preconditions and always succeeds.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    let tid = libc::id_t::try_from(tid).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
    // SAFETY: setpriority only reads its scalar arguments.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid, nice_for(priority)) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Applies `priority` to the calling thread.
#[cfg(not(target_os = "linux"))]
pub fn set_current_thread_priority(_priority: i32) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "thread priority is not supported here"))
}
