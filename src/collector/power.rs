use std::path::{Path, PathBuf};

use crate::atom::{AtomKind, AtomValue};
use crate::delta::{Delta, DeltaTracker};
use crate::sink::Reporter;

use super::{require, sysfs, CollectError, Collector, Source};

/// Largest bucket count the atom can carry.
pub const MAX_RESUME_LATENCY_BUCKETS: usize = 36;

/// Stream keys of the resume latency tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LatencyKey {
    Bucket(usize),
    Sum,
    Count,
}

/// Parsed `resume_latency_metrics` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeLatencySample {
    pub max_latency_ms: i64,
    pub sum_latency_ms: i64,
    pub buckets: Vec<i64>,
}

impl ResumeLatencySample {
    /// Parses the header lines and the histogram.
    ///
    /// ```text
    /// Resume Latency Bucket Count: 3
    /// Max Resume Latency: 120
    /// Sum Resume Latency: 4000
    /// 0 - 10ms ====> 50
    /// 10 - 100ms ====> 12
    /// 100 - infms ====> 1
    /// ```
    pub fn parse(path: &Path, contents: &str) -> Result<Self, CollectError> {
        let format_err = |reason: String| CollectError::Format {
            path: path.to_path_buf(),
            reason,
        };

        let mut lines = contents.lines();
        let mut header = |prefix: &str| -> Result<i64, CollectError> {
            lines
                .next()
                .and_then(|l| l.trim().strip_prefix(prefix))
                .and_then(|v| v.trim().parse().ok())
                .ok_or_else(|| format_err(format!("missing {prefix:?} header")))
        };

        let bucket_count = header("Resume Latency Bucket Count:")?;
        let max_latency_ms = header("Max Resume Latency:")?;
        let sum_latency_ms = header("Sum Resume Latency:")?;

        let bucket_count = usize::try_from(bucket_count)
            .ok()
            .filter(|&n| n <= MAX_RESUME_LATENCY_BUCKETS)
            .ok_or_else(|| {
                format_err(format!(
                    "bucket count {bucket_count} outside 0..={MAX_RESUME_LATENCY_BUCKETS}"
                ))
            })?;

        let buckets: Vec<i64> = lines.map_while(parse_bucket_line).collect();
        if buckets.len() != bucket_count {
            return Err(format_err(format!(
                "{} bucket lines, header says {bucket_count}",
                buckets.len()
            )));
        }

        Ok(Self {
            max_latency_ms,
            sum_latency_ms,
            buckets,
        })
    }

    /// Total number of resumes across all buckets.
    pub fn resume_count(&self) -> i64 {
        self.buckets.iter().sum()
    }
}

/// Parses `<lo> - <hi|inf>ms ====> <count>` and returns the count.
fn parse_bucket_line(line: &str) -> Option<i64> {
    let (range, count) = line.split_once("====>")?;
    let (lo, hi) = range.trim().strip_suffix("ms")?.split_once('-')?;
    lo.trim().parse::<i64>().ok()?;
    let hi = hi.trim();
    if hi != "inf" {
        hi.parse::<i64>().ok()?;
    }
    count.trim().parse().ok()
}

/// Suspend/resume latency histogram, reported as per-window deltas.
pub struct ResumeLatency {
    path: Option<PathBuf>,
    tracker: DeltaTracker<LatencyKey, usize>,
}

impl ResumeLatency {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            tracker: DeltaTracker::new(),
        }
    }

    fn record_reset(&self, reporter: &Reporter) {
        reporter
            .health()
            .delta_resets
            .with_label_values(&[super::RESUME_LATENCY])
            .inc();
    }
}

impl Collector for ResumeLatency {
    fn name(&self) -> &'static str {
        super::RESUME_LATENCY
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("resume_latency_metrics", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("resume_latency_metrics", &self.path)?;
        let sample = ResumeLatencySample::parse(path, &sysfs::read_to_string(path)?)?;
        let shape = sample.buckets.len();

        let mut bucket_deltas = Vec::with_capacity(shape);
        let mut resets = 0;
        for (i, &count) in sample.buckets.iter().enumerate() {
            let delta = match self.tracker.compute(LatencyKey::Bucket(i), count, shape) {
                Delta::Value(d) => d,
                Delta::FirstSample => count,
                Delta::Reset => {
                    resets += 1;
                    count
                }
            };
            bucket_deltas.push(AtomValue::Long(delta));
        }

        // Counters start at zero, so a first sample covers everything since boot.
        let mut window = |key: LatencyKey, value: i64| match self.tracker.compute(key, value, shape)
        {
            Delta::Value(d) => Some(d),
            Delta::FirstSample => Some(value),
            Delta::Reset => {
                resets += 1;
                None
            }
        };
        let sum = window(LatencyKey::Sum, sample.sum_latency_ms);
        let count = window(LatencyKey::Count, sample.resume_count());

        let avg_latency = match (sum, count) {
            (Some(sum), Some(count)) if sum >= 0 && count > 0 => sum / count,
            _ => -1,
        };

        if resets > 0 {
            self.record_reset(reporter);
        }

        reporter.build_and_report(
            AtomKind::ResumeLatency
                .builder()
                .long("max_latency", sample.max_latency_ms)
                .long("avg_latency", avg_latency)
                .extend(bucket_deltas),
        )?;
        Ok(())
    }
}
