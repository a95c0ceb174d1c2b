use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::{debug, warn};

/// Blocking datagram source of raw uevents.
pub trait UeventSource: Send {
    /// Receives one datagram into `buf` and returns its length.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Kernel uevent multicast socket (`NETLINK_KOBJECT_UEVENT`).
#[derive(Debug)]
pub struct NetlinkUeventSocket {
    fd: OwnedFd,
}

impl NetlinkUeventSocket {
    /// Opens the socket, sizes its receive buffer and joins every group.
    pub fn open(receive_buffer_size: usize) -> io::Result<Self> {
        // SAFETY: plain syscall; the result is checked below.
        let raw = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: `raw` is a new descriptor not owned elsewhere.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        set_receive_buffer(&fd, receive_buffer_size);

        // SAFETY: sockaddr_nl is plain data; all-zero is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_pid = 0;
        addr.nl_groups = 0xffff_ffff;

        // SAFETY: `addr` is a valid sockaddr_nl and the length matches it.
        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                (&addr as *const libc::sockaddr_nl).cast::<libc::sockaddr>(),
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        debug!(receive_buffer_size, "uevent socket bound");

        Ok(Self { fd })
    }
}

/// Forces the receive buffer size, falling back to the capped variant when
/// the process lacks CAP_NET_ADMIN.
fn set_receive_buffer(fd: &OwnedFd, size: usize) {
    let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);

    for opt in [libc::SO_RCVBUFFORCE, libc::SO_RCVBUF] {
        // SAFETY: `value` is a live c_int and the length matches it.
        let rc = unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                opt,
                (&value as *const libc::c_int).cast::<libc::c_void>(),
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc == 0 {
            return;
        }
    }

    warn!(
        size,
        error = %io::Error::last_os_error(),
        "could not set uevent receive buffer size",
    );
}

impl UeventSource for NetlinkUeventSocket {
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: sockaddr_nl is plain data; all-zero is a valid value.
            let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
            let mut addr_len = mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t;

            // SAFETY: `buf` is valid for `buf.len()` bytes and `addr` for
            // `addr_len` bytes for the duration of the call.
            let n = unsafe {
                libc::recvfrom(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                    0,
                    (&mut addr as *mut libc::sockaddr_nl).cast::<libc::sockaddr>(),
                    &mut addr_len,
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            // Only the kernel (pid 0) broadcasting to a group is trusted.
            if addr.nl_pid != 0 || addr.nl_groups == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "uevent from untrusted sender pid={} groups={}",
                        addr.nl_pid, addr.nl_groups
                    ),
                ));
            }

            return Ok(n as usize);
        }
    }
}
