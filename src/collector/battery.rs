use std::path::PathBuf;

use crate::atom::{AtomKind, AtomValue};
use crate::sink::Reporter;

use super::{as_int, require, sysfs, CollectError, Collector, Source};

/// Number of charge cycle buckets in the atom.
pub const CHARGE_CYCLE_BUCKETS: usize = 10;

/// Fuel gauge capacity deltas.
pub struct BatteryCapacity {
    cc: Option<PathBuf>,
    vfsoc: Option<PathBuf>,
}

impl BatteryCapacity {
    pub fn new(cc: Option<PathBuf>, vfsoc: Option<PathBuf>) -> Self {
        Self { cc, vfsoc }
    }
}

impl Collector for BatteryCapacity {
    fn name(&self) -> &'static str {
        super::BATTERY_CAPACITY
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("delta_cc_sum", self.cc.as_deref()),
            Source::new("delta_vfsoc_sum", self.vfsoc.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let cc = sysfs::read_int(require("delta_cc_sum", &self.cc)?)?;
        let vfsoc = sysfs::read_int(require("delta_vfsoc_sum", &self.vfsoc)?)?;

        reporter.build_and_report(
            AtomKind::BatteryCapacity
                .builder()
                .int("delta_cc_sum", as_int(cc))
                .int("delta_vfsoc_sum", as_int(vfsoc)),
        )?;
        Ok(())
    }
}

/// Histogram of charge cycles, zero-padded to a fixed bucket count.
pub struct ChargeCycles {
    path: Option<PathBuf>,
}

impl ChargeCycles {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for ChargeCycles {
    fn name(&self) -> &'static str {
        super::CHARGE_CYCLES
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("cycle_counts", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("cycle_counts", &self.path)?;
        let mut buckets: Vec<i32> = sysfs::parse_fields(path, &sysfs::read_to_string(path)?)?;

        if buckets.len() > CHARGE_CYCLE_BUCKETS {
            return Err(CollectError::Format {
                path: path.to_path_buf(),
                reason: format!(
                    "{} buckets, at most {CHARGE_CYCLE_BUCKETS} supported",
                    buckets.len()
                ),
            });
        }
        buckets.resize(CHARGE_CYCLE_BUCKETS, 0);

        reporter.build_and_report(
            AtomKind::ChargeCycles
                .builder()
                .extend(buckets.into_iter().map(AtomValue::Int)),
        )?;
        Ok(())
    }
}
