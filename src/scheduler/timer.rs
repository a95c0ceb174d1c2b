use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use super::{ScheduleError, TickSource};

/// Periodic `timerfd` on `CLOCK_BOOTTIME`.
///
/// Boot time keeps counting while the device suspends, so a wake after a
/// long suspend reports every expiration that was missed.
#[derive(Debug)]
pub struct TimerFd {
    fd: OwnedFd,
    interval: Duration,
}

impl TimerFd {
    /// Creates the timer and arms it to first expire after one `interval`.
    pub fn new(interval: Duration) -> Result<Self, ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::ZeroTick);
        }

        // SAFETY: plain syscall with constant flags; the returned descriptor
        // is checked before use.
        let raw = unsafe { libc::timerfd_create(libc::CLOCK_BOOTTIME, libc::TFD_CLOEXEC) };
        if raw < 0 {
            return Err(ScheduleError::TimerCreate(io::Error::last_os_error()));
        }
        // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let spec = to_timespec(interval);
        let new_value = libc::itimerspec {
            it_interval: spec,
            it_value: spec,
        };

        // SAFETY: `fd` is a valid timerfd and `new_value` outlives the call.
        let rc = unsafe {
            libc::timerfd_settime(fd.as_raw_fd(), 0, &new_value, std::ptr::null_mut())
        };
        if rc < 0 {
            return Err(ScheduleError::TimerArm(io::Error::last_os_error()));
        }

        Ok(Self { fd, interval })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Blocks until the timer expires and returns the expiration count.
    pub fn read_expirations(&self) -> Result<u64, ScheduleError> {
        let mut buf = [0u8; 8];

        loop {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            let n = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast::<libc::c_void>(),
                    buf.len(),
                )
            };

            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ScheduleError::TimerRead(err));
            }

            let n = n as usize;
            if n != buf.len() {
                return Err(ScheduleError::ShortRead(n));
            }

            return Ok(u64::from_ne_bytes(buf));
        }
    }
}

impl TickSource for TimerFd {
    fn wait(&mut self) -> Result<Option<u64>, ScheduleError> {
        self.read_expirations().map(Some)
    }
}

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}
