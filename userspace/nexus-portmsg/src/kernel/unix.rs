// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Cross-process port kernel over Unix datagram sockets
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 7 unit tests (tempdir namespaces)
//!
//! A namespace directory stands in for the bootstrap name service: every registered
//! service owns `<namespace>/<name>.port`. Receive rights are bound sockets, send rights
//! are unbound sockets connected to the service file.
//!
//! INVARIANTS:
//!   - Socket wait mode changes only when the requested `Wait` differs from the last one
//!   - A socket file whose owner is gone is reclaimed on registration
//!   - Releasing a receive right shuts its socket down and removes its file
//!   - Every socket asks for SOCKET_BUFFER_BYTES of send and receive buffer; the OS may clamp it
//!   - A datagram the send buffer can never hold fails with TooLarge, not a raw errno
//!
//! UNSAFE: `setsockopt`/`getsockopt` on descriptors owned by the wrapped sockets.

#![allow(unsafe_code)]

use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{validate_outgoing, KernelError, PortKernel, PortName, TransportHeader, Wait};

const FIRST_PORT_NAME: u32 = 0x103;
const SOCKET_SUFFIX: &str = "port";
/// Requested `SO_SNDBUF`/`SO_RCVBUF`. Linux clamps to `net.core.{w,r}mem_max` and doubles it,
/// which still leaves room for packets well past the default 256 KiB host buffer.
const SOCKET_BUFFER_BYTES: libc::c_int = 4 << 20;

/// Port kernel whose name service is a directory of datagram sockets.
pub struct UnixKernel {
    namespace: PathBuf,
    rights: Mutex<HashMap<PortName, UnixRight>>,
    next_name: AtomicU32,
}

#[derive(Clone)]
enum UnixRight {
    Receive(Arc<ModalSocket>),
    Send(Arc<ModalSocket>),
}

struct ModalSocket {
    socket: UnixDatagram,
    path: PathBuf,
    mode: Mutex<Option<Wait>>,
}

impl ModalSocket {
    fn new(socket: UnixDatagram, path: PathBuf) -> Self {
        Self { socket, path, mode: Mutex::new(None) }
    }

    fn apply_read(&self, wait: Wait) -> io::Result<()> {
        let mut mode = self.mode.lock();
        if *mode == Some(wait) {
            return Ok(());
        }
        self.socket.set_nonblocking(wait.is_non_blocking())?;
        if !wait.is_non_blocking() {
            self.socket.set_read_timeout(wait.timeout())?;
        }
        *mode = Some(wait);
        Ok(())
    }

    fn apply_write(&self, wait: Wait) -> io::Result<()> {
        let mut mode = self.mode.lock();
        if *mode == Some(wait) {
            return Ok(());
        }
        self.socket.set_nonblocking(wait.is_non_blocking())?;
        if !wait.is_non_blocking() {
            self.socket.set_write_timeout(wait.timeout())?;
        }
        *mode = Some(wait);
        Ok(())
    }
}

impl UnixKernel {
    /// Opens (creating if needed) the namespace directory `namespace`.
    pub fn new(namespace: impl Into<PathBuf>) -> io::Result<Self> {
        let namespace = namespace.into();
        std::fs::create_dir_all(&namespace)?;
        Ok(Self {
            namespace,
            rights: Mutex::new(HashMap::new()),
            next_name: AtomicU32::new(FIRST_PORT_NAME),
        })
    }

    /// Shared namespace under the system temporary directory.
    pub fn default_namespace() -> PathBuf {
        std::env::temp_dir().join("nexus-portmsg")
    }

    /// Directory holding the service socket files.
    pub fn namespace(&self) -> &Path {
        &self.namespace
    }

    fn service_path(&self, name: &str) -> Result<PathBuf, KernelError> {
        if name.is_empty() || name.contains(['/', '\0']) || name.starts_with('.') {
            return Err(KernelError::InvalidServiceName);
        }
        Ok(self.namespace.join(format!("{name}.{SOCKET_SUFFIX}")))
    }

    fn insert(&self, right: UnixRight) -> PortName {
        let name = PortName::new(self.next_name.fetch_add(1, Ordering::Relaxed));
        self.rights.lock().insert(name, right);
        name
    }

    fn right(&self, port: PortName) -> Option<UnixRight> {
        self.rights.lock().get(&port).cloned()
    }

    fn is_live(&self, port: PortName) -> bool {
        self.rights.lock().contains_key(&port)
    }
}

fn os_error(err: &io::Error) -> KernelError {
    KernelError::Os(err.raw_os_error().unwrap_or(-1))
}

fn set_buffer_option(socket: &UnixDatagram, option: libc::c_int) -> io::Result<()> {
    let value = SOCKET_BUFFER_BYTES;
    // SAFETY: the descriptor stays open for the borrow of `socket` and `value` is a live c_int
    // whose size is passed alongside it.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            option,
            (&value as *const libc::c_int).cast(),
            core::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn enlarge_buffers(socket: UnixDatagram) -> Result<UnixDatagram, KernelError> {
    set_buffer_option(&socket, libc::SO_SNDBUF).map_err(|err| os_error(&err))?;
    set_buffer_option(&socket, libc::SO_RCVBUF).map_err(|err| os_error(&err))?;
    Ok(socket)
}

/// Send buffer the OS actually granted, or 0 when it cannot be queried.
fn send_buffer_len(socket: &UnixDatagram) -> usize {
    let mut value: libc::c_int = 0;
    let mut len = core::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `value` and `len` are live locals sized for SO_SNDBUF's c_int result.
    let rc = unsafe {
        libc::getsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            (&mut value as *mut libc::c_int).cast(),
            &mut len,
        )
    };
    if rc == 0 {
        usize::try_from(value).unwrap_or(0)
    } else {
        0
    }
}

fn bind_service(path: &Path) -> Result<UnixDatagram, KernelError> {
    let socket = bind_or_reclaim(path)?;
    enlarge_buffers(socket).map_err(|err| {
        let _ = std::fs::remove_file(path);
        err
    })
}

fn bind_or_reclaim(path: &Path) -> Result<UnixDatagram, KernelError> {
    match UnixDatagram::bind(path) {
        Ok(socket) => Ok(socket),
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            let owner_check = UnixDatagram::unbound().map_err(|err| os_error(&err))?;
            match owner_check.connect(path) {
                Ok(()) => Err(KernelError::AlreadyRegistered),
                Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                    // Owner exited without cleaning up; reclaim the name.
                    std::fs::remove_file(path).map_err(|err| os_error(&err))?;
                    UnixDatagram::bind(path).map_err(|err| os_error(&err))
                }
                Err(err) => Err(os_error(&err)),
            }
        }
        Err(err) => Err(os_error(&err)),
    }
}

impl PortKernel for UnixKernel {
    fn register_name(&self, name: &str) -> Result<PortName, KernelError> {
        let path = self.service_path(name)?;
        let socket = bind_service(&path)?;
        Ok(self.insert(UnixRight::Receive(Arc::new(ModalSocket::new(socket, path)))))
    }

    fn lookup_name(&self, name: &str) -> Result<PortName, KernelError> {
        let path = self.service_path(name)?;
        let socket =
            UnixDatagram::unbound().map_err(|err| os_error(&err)).and_then(enlarge_buffers)?;
        match socket.connect(&path) {
            Ok(()) => Ok(self.insert(UnixRight::Send(Arc::new(ModalSocket::new(socket, path))))),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
                ) =>
            {
                Err(KernelError::NotFound)
            }
            Err(err) => Err(os_error(&err)),
        }
    }

    fn receive(
        &self,
        port: PortName,
        buf: &mut [u8],
        wait: Wait,
    ) -> Result<TransportHeader, KernelError> {
        let Some(UnixRight::Receive(socket)) = self.right(port) else {
            return Err(KernelError::InvalidRight(port));
        };
        socket.apply_read(wait).map_err(|err| os_error(&err))?;
        match socket.socket.recv(buf) {
            Ok(0) if !self.is_live(port) => Err(KernelError::PortDead),
            Ok(len) => {
                let header = TransportHeader::decode(&buf[..len])?;
                let size = header.size as usize;
                if size > len {
                    // The datagram was truncated to the buffer; its tail is gone.
                    return Err(KernelError::TooLarge { size, capacity: buf.len() });
                }
                if size < len {
                    return Err(KernelError::InvalidHeader);
                }
                Ok(header)
            }
            Err(_) if !self.is_live(port) => Err(KernelError::PortDead),
            Err(err) => Err(KernelError::from_io(&err)),
        }
    }

    fn send(&self, packet: &[u8], wait: Wait) -> Result<(), KernelError> {
        let header = validate_outgoing(packet)?;
        let socket = match self.right(header.remote) {
            Some(UnixRight::Send(socket)) => socket,
            Some(UnixRight::Receive(_)) | None => {
                return Err(KernelError::InvalidRight(header.remote))
            }
        };
        socket.apply_write(wait).map_err(|err| os_error(&err))?;
        match socket.socket.send(packet) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EMSGSIZE) => Err(KernelError::TooLarge {
                size: packet.len(),
                capacity: send_buffer_len(&socket.socket),
            }),
            Err(err) => Err(KernelError::from_io(&err)),
        }
    }

    fn release(&self, port: PortName) {
        let Some(right) = self.rights.lock().remove(&port) else {
            return;
        };
        if let UnixRight::Receive(socket) = right {
            let _ = socket.socket.shutdown(Shutdown::Both);
            let _ = std::fs::remove_file(&socket.path);
        }
    }
}

impl Drop for UnixKernel {
    fn drop(&mut self) {
        for (_, right) in self.rights.get_mut().drain() {
            if let UnixRight::Receive(socket) = right {
                let _ = std::fs::remove_file(&socket.path);
            }
        }
    }
}
