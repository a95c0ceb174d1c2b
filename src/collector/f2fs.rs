//! F2FS statistics for the filesystem mounted on `/data`.
//!
//! The kernel exposes one directory per block device under the F2FS sysfs
//! root. The device name is looked up in the mount table on every run, so a
//! remount onto another device is picked up without a restart.

use std::path::{Path, PathBuf};

use crate::atom::AtomKind;
use crate::sink::Reporter;

use super::{as_int, require, sysfs, CollectError, Collector, Source};

pub const DATA_MOUNT_POINT: &str = "/data";

/// Garbage collection modes sampled by [`F2fsGcSegment`], in atom order.
const GC_MODES: [(&str, &str); 4] = [
    ("0", "reclaimed_segments_normal"),
    ("4", "reclaimed_segments_urgent_high"),
    ("5", "reclaimed_segments_urgent_low"),
    ("6", "reclaimed_segments_urgent_mid"),
];

/// Returns the device basename mounted on `/data` in a mounts table.
pub fn userdata_block(mounts: &str) -> Option<&str> {
    mounts.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let device = fields.next()?;
        if fields.next()? != DATA_MOUNT_POINT {
            return None;
        }
        device.rsplit('/').next().filter(|name| !name.is_empty())
    })
}

/// Locates the per-device F2FS directory.
#[derive(Debug, Clone)]
pub struct F2fsDir {
    root: Option<PathBuf>,
    mounts: PathBuf,
}

impl F2fsDir {
    pub fn new(root: Option<PathBuf>, mounts: PathBuf) -> Self {
        Self { root, mounts }
    }

    fn source(&self) -> Source<'_> {
        Source::new("f2fs_stats", self.root.as_deref())
    }

    fn resolve(&self) -> Result<PathBuf, CollectError> {
        let root = require("f2fs_stats", &self.root)?;
        let mounts = sysfs::read_to_string(&self.mounts)?;
        let block = userdata_block(&mounts).ok_or_else(|| CollectError::Format {
            path: self.mounts.clone(),
            reason: format!("no filesystem mounted on {DATA_MOUNT_POINT}"),
        })?;
        Ok(root.join(block))
    }
}

/// Reads a counter and clears it by writing `0`.
fn read_and_clear(path: &Path) -> Result<i64, CollectError> {
    let value = sysfs::read_int(path)?;
    sysfs::write_value(path, "0")?;
    Ok(value)
}

/// Segment, checkpoint and garbage collection counters.
pub struct F2fsStats {
    dir: F2fsDir,
}

impl F2fsStats {
    pub fn new(dir: F2fsDir) -> Self {
        Self { dir }
    }
}

impl Collector for F2fsStats {
    fn name(&self) -> &'static str {
        super::F2FS_STATS
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![self.dir.source()]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let dir = self.dir.resolve()?;
        let read = |file: &str| sysfs::read_int(&dir.join(file)).map(as_int);

        reporter.build_and_report(
            AtomKind::F2fsStats
                .builder()
                .int("dirty_segments", read("dirty_segments")?)
                .int("free_segments", read("free_segments")?)
                .int("cp_calls_fg", read("cp_foreground_calls")?)
                .int("cp_calls_bg", read("cp_background_calls")?)
                .int("gc_calls_fg", read("gc_foreground_calls")?)
                .int("gc_calls_bg", read("gc_background_calls")?)
                .int("moved_blocks_fg", read("moved_blocks_foreground")?)
                .int("moved_blocks_bg", read("moved_blocks_background")?)
                .int("valid_blocks", read("avg_vblocks")?),
        )?;
        Ok(())
    }
}

/// Atomic write counters, cleared after each read.
pub struct F2fsAtomicWrite {
    dir: F2fsDir,
}

impl F2fsAtomicWrite {
    pub fn new(dir: F2fsDir) -> Self {
        Self { dir }
    }
}

impl Collector for F2fsAtomicWrite {
    fn name(&self) -> &'static str {
        super::F2FS_ATOMIC_WRITE
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![self.dir.source()]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let dir = self.dir.resolve()?;
        let peak = read_and_clear(&dir.join("peak_atomic_write"))?;
        let committed = read_and_clear(&dir.join("committed_atomic_block"))?;
        let revoked = read_and_clear(&dir.join("revoked_atomic_block"))?;

        reporter.build_and_report(
            AtomKind::F2fsAtomicWriteInfo
                .builder()
                .int("peak_atomic_write", as_int(peak))
                .int("committed_atomic_block", as_int(committed))
                .int("revoked_atomic_block", as_int(revoked)),
        )?;
        Ok(())
    }
}

/// Compression counters. The written-block total is cumulative and never
/// cleared.
pub struct F2fsCompression {
    dir: F2fsDir,
}

impl F2fsCompression {
    pub fn new(dir: F2fsDir) -> Self {
        Self { dir }
    }
}

impl Collector for F2fsCompression {
    fn name(&self) -> &'static str {
        super::F2FS_COMPRESSION
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![self.dir.source()]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let dir = self.dir.resolve()?;
        let written = sysfs::read_int(&dir.join("compr_written_block"))?;
        let saved = read_and_clear(&dir.join("compr_saved_block"))?;
        let new_inodes = read_and_clear(&dir.join("compr_new_inode"))?;

        reporter.build_and_report(
            AtomKind::F2fsCompressionInfo
                .builder()
                .int("compr_written_blocks", as_int(written))
                .int("compr_saved_blocks", as_int(saved))
                .int("compr_new_inodes", as_int(new_inodes)),
        )?;
        Ok(())
    }
}

/// Segments reclaimed per garbage collection mode.
///
/// Each mode is selected through `gc_segment_mode` before its counter is read
/// and cleared. Any failure abandons the whole report.
pub struct F2fsGcSegment {
    dir: F2fsDir,
}

impl F2fsGcSegment {
    pub fn new(dir: F2fsDir) -> Self {
        Self { dir }
    }
}

impl Collector for F2fsGcSegment {
    fn name(&self) -> &'static str {
        super::F2FS_GC_SEGMENT
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![self.dir.source()]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let dir = self.dir.resolve()?;
        let mode_path = dir.join("gc_segment_mode");
        let reclaimed_path = dir.join("gc_reclaimed_segments");

        let mut builder = AtomKind::F2fsGcSegmentInfo.builder();
        for (mode, field) in GC_MODES {
            sysfs::write_value(&mode_path, mode)?;
            let reclaimed = read_and_clear(&reclaimed_path)?;
            tracing::debug!(mode, reclaimed, "f2fs gc segments");
            builder = builder.int(field, as_int(reclaimed));
        }

        reporter.build_and_report(builder)?;
        Ok(())
    }
}
