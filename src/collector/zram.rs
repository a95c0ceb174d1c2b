use std::path::PathBuf;

use crate::atom::AtomKind;
use crate::delta::{Delta, DeltaTracker};
use crate::sink::Reporter;

use super::{require, sysfs, CollectError, Collector, Source};

/// Field count of mm_stat without the huge_pages_since column.
const MM_STAT_MIN_FIELDS: usize = 8;
const MM_STAT_HUGE_PAGES: usize = 7;
const MM_STAT_HUGE_PAGES_SINCE: usize = 8;

/// zram `mm_stat` memory usage, with huge page creation as a delta.
pub struct ZramMmStat {
    path: Option<PathBuf>,
    huge_pages_since: DeltaTracker<(), usize>,
}

impl ZramMmStat {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            huge_pages_since: DeltaTracker::new(),
        }
    }
}

impl Collector for ZramMmStat {
    fn name(&self) -> &'static str {
        super::ZRAM_MM_STAT
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("mm_stat", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("mm_stat", &self.path)?;
        let fields: Vec<i64> = sysfs::parse_fields(path, &sysfs::read_to_string(path)?)?;

        if fields.len() < MM_STAT_MIN_FIELDS {
            return Err(CollectError::Format {
                path: path.to_path_buf(),
                reason: format!(
                    "{} fields, want at least {MM_STAT_MIN_FIELDS}",
                    fields.len()
                ),
            });
        }

        // Older kernels lack the cumulative column; report no growth then.
        let huge_pages_since_delta = match fields.get(MM_STAT_HUGE_PAGES_SINCE) {
            None => 0,
            Some(&total) => match self.huge_pages_since.compute((), total, fields.len()) {
                Delta::Value(d) => d,
                Delta::FirstSample => 0,
                Delta::Reset => {
                    reporter
                        .health()
                        .delta_resets
                        .with_label_values(&[self.name()])
                        .inc();
                    0
                }
            },
        };

        reporter.build_and_report(
            AtomKind::ZramMmStat
                .builder()
                .long("orig_data_size", fields[0])
                .long("compr_data_size", fields[1])
                .long("mem_used_total", fields[2])
                .long("same_pages", fields[5])
                .long("huge_pages", fields[MM_STAT_HUGE_PAGES])
                .long("huge_pages_since_boot", huge_pages_since_delta),
        )?;

        Ok(())
    }
}

/// zram backing device counters.
pub struct ZramBdStat {
    path: Option<PathBuf>,
}

impl ZramBdStat {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for ZramBdStat {
    fn name(&self) -> &'static str {
        super::ZRAM_BD_STAT
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("bd_stat", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("bd_stat", &self.path)?;
        let fields: Vec<i64> = sysfs::parse_fields(path, &sysfs::read_to_string(path)?)?;

        let [count, reads, writes] = fields[..] else {
            return Err(CollectError::Format {
                path: path.to_path_buf(),
                reason: format!("{} fields, want 3", fields.len()),
            });
        };

        reporter.build_and_report(
            AtomKind::ZramBdStat
                .builder()
                .long("bd_count", count)
                .long("bd_reads", reads)
                .long("bd_writes", writes),
        )?;

        Ok(())
    }
}
