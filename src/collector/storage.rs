use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::atom::AtomKind;
use crate::sink::Reporter;

use super::{as_int, require, sysfs, CollectError, Collector, Source};

const BLOCK_STAT_MIN_FIELDS: usize = 11;

/// Block device I/O totals from `/sys/block/<dev>/stat`.
pub struct BlockStats {
    path: Option<PathBuf>,
}

impl BlockStats {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for BlockStats {
    fn name(&self) -> &'static str {
        super::BLOCK_STATS
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("stat", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("stat", &self.path)?;
        let fields: Vec<u64> = sysfs::parse_fields(path, &sysfs::read_to_string(path)?)?;

        if fields.len() < BLOCK_STAT_MIN_FIELDS {
            return Err(CollectError::Format {
                path: path.to_path_buf(),
                reason: format!(
                    "{} fields, want at least {BLOCK_STAT_MIN_FIELDS}",
                    fields.len()
                ),
            });
        }

        let long = |i: usize| i64::try_from(fields[i]).unwrap_or(i64::MAX);

        reporter.build_and_report(
            AtomKind::BlockStats
                .builder()
                .long("read_io", long(0))
                .long("read_sectors", long(2))
                .long("read_ticks", long(3))
                .long("write_io", long(4))
                .long("write_sectors", long(6))
                .long("write_ticks", long(7)),
        )?;
        Ok(())
    }
}

/// Operation codes of the `slow_io` atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlowIoOperation {
    Read = 1,
    Write = 2,
    Unmap = 3,
    Sync = 4,
}

impl SlowIoOperation {
    fn label(self) -> &'static str {
        match self {
            Self::Read => "slow_io_read",
            Self::Write => "slow_io_write",
            Self::Unmap => "slow_io_unmap",
            Self::Sync => "slow_io_sync",
        }
    }
}

/// Count of slow I/O operations since the last read. The kernel counter is
/// cleared after every read.
pub struct SlowIo {
    operation: SlowIoOperation,
    path: Option<PathBuf>,
}

impl SlowIo {
    pub fn new(operation: SlowIoOperation, path: Option<PathBuf>) -> Self {
        Self { operation, path }
    }
}

impl Collector for SlowIo {
    fn name(&self) -> &'static str {
        super::SLOW_IO
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new(self.operation.label(), self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require(self.operation.label(), &self.path)?;
        let count = sysfs::read_int(path)?;

        if count > 0 {
            reporter.build_and_report(
                AtomKind::SlowIo
                    .builder()
                    .int("operation", self.operation as i32)
                    .int("count", as_int(count)),
            )?;
        }

        sysfs::write_value(path, "0")
    }
}

/// UFS device lifetime estimates A, B and C.
pub struct UfsLifetime {
    a: Option<PathBuf>,
    b: Option<PathBuf>,
    c: Option<PathBuf>,
}

impl UfsLifetime {
    pub fn new(a: Option<PathBuf>, b: Option<PathBuf>, c: Option<PathBuf>) -> Self {
        Self { a, b, c }
    }
}

impl Collector for UfsLifetime {
    fn name(&self) -> &'static str {
        super::UFS_LIFETIME
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("lifetime_a", self.a.as_deref()),
            Source::new("lifetime_b", self.b.as_deref()),
            Source::new("lifetime_c", self.c.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let a = sysfs::read_int(require("lifetime_a", &self.a)?)?;
        let b = sysfs::read_int(require("lifetime_b", &self.b)?)?;
        let c = sysfs::read_int(require("lifetime_c", &self.c)?)?;

        reporter.build_and_report(
            AtomKind::UfsLifetime
                .builder()
                .int("lifetime_a", as_int(a))
                .int("lifetime_b", as_int(b))
                .int("lifetime_c", as_int(c)),
        )?;
        Ok(())
    }
}

/// Total UFS host resets, summed over the host error counters.
pub struct UfsResetCount {
    paths: Vec<PathBuf>,
}

impl UfsResetCount {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl Collector for UfsResetCount {
    fn name(&self) -> &'static str {
        super::UFS_RESET_COUNT
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new(
            "ufs_err_stats",
            self.paths.first().map(PathBuf::as_path),
        )]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        // A partial sum would under-report, so any failed read aborts.
        let total = self
            .paths
            .iter()
            .map(|p| sysfs::read_int(p))
            .sum::<Result<i64, CollectError>>()?;

        reporter.build_and_report(
            AtomKind::UfsResetCount
                .builder()
                .int("host_reset_count", as_int(total)),
        )?;
        Ok(())
    }
}

/// Directory codes of the `partition_used_space` atom.
const DIRECTORY_PERSIST: i32 = 1;

/// Free and total bytes of the persist partition.
pub struct PartitionUsedSpace {
    path: Option<PathBuf>,
}

impl PartitionUsedSpace {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for PartitionUsedSpace {
    fn name(&self) -> &'static str {
        super::PARTITION_USED_SPACE
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("mount_point", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("mount_point", &self.path)?;
        let (free, total) = statfs_bytes(path).map_err(|source| CollectError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        reporter.build_and_report(
            AtomKind::PartitionUsedSpace
                .builder()
                .int("directory", DIRECTORY_PERSIST)
                .long("free_bytes", free)
                .long("total_bytes", total),
        )?;
        Ok(())
    }
}

/// Returns `(free, total)` bytes of the filesystem holding `path`.
fn statfs_bytes(path: &Path) -> io::Result<(i64, i64)> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: statfs is plain data; all-zero is a valid value.
    let mut st: libc::statfs = unsafe { std::mem::zeroed() };
    // SAFETY: `c_path` is NUL-terminated and `st` is a valid out pointer.
    if unsafe { libc::statfs(c_path.as_ptr(), &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let bsize = st.f_bsize as i64;
    let free = (st.f_bfree as i64).saturating_mul(bsize);
    let total = (st.f_blocks as i64).saturating_mul(bsize);
    Ok((free, total))
}
