use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Lines;

use crate::atom::{AtomBuilder, AtomKind};
use crate::sink::Reporter;

use super::{require, sysfs, CollectError, Collector, Source};

/// Pairs carried per table; missing slots are padded with `(-1, 0)`.
pub const TOP_IRQS: usize = 5;

const SOFTIRQ_FIELDS: [(&str, &str); TOP_IRQS] = [
    ("top1_softirq_num", "top1_softirq_latency"),
    ("top2_softirq_num", "top2_softirq_latency"),
    ("top3_softirq_num", "top3_softirq_latency"),
    ("top4_softirq_num", "top4_softirq_latency"),
    ("top5_softirq_num", "top5_softirq_latency"),
];

const IRQ_FIELDS: [(&str, &str); TOP_IRQS] = [
    ("top1_irq_num", "top1_irq_latency"),
    ("top2_irq_num", "top2_irq_latency"),
    ("top3_irq_num", "top3_irq_latency"),
    ("top4_irq_num", "top4_irq_latency"),
    ("top5_irq_num", "top5_irq_latency"),
];

const STORM_FIELDS: [(&str, &str); TOP_IRQS] = [
    ("storm_irq_top1_num", "storm_irq_top1_count"),
    ("storm_irq_top2_num", "storm_irq_top2_count"),
    ("storm_irq_top3_num", "storm_irq_top3_count"),
    ("storm_irq_top4_num", "storm_irq_top4_count"),
    ("storm_irq_top5_num", "storm_irq_top5_count"),
];

/// One `<irq> <value>` row.
pub type IrqPair = (i64, i64);

/// Parsed long IRQ and storm IRQ files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongIrqSample {
    pub softirq_count: i64,
    pub softirqs: Vec<IrqPair>,
    pub irq_count: i64,
    pub irqs: Vec<IrqPair>,
    pub storms: Vec<IrqPair>,
}

impl LongIrqSample {
    /// Parses both files.
    ///
    /// ```text
    /// long SOFTIRQ count: 2
    /// long SOFTIRQ detail (num, latency):
    /// 3 1200000
    /// long IRQ count: 1
    /// long IRQ detail (num, latency):
    /// 201 4000000
    /// ```
    ///
    /// The storm file holds `storm IRQ detail (num, storm_count):` followed by
    /// rows of the same shape.
    pub fn parse(
        irq_path: &Path,
        irq_contents: &str,
        storm_path: &Path,
        storm_contents: &str,
    ) -> Result<Self, CollectError> {
        let mut lines = irq_contents.lines().peekable();
        let softirq_count = header_value(irq_path, &mut lines, "long SOFTIRQ count:")?;
        expect_line(irq_path, &mut lines, "long SOFTIRQ detail (num, latency):")?;
        let softirqs = take_pairs(&mut lines);
        let irq_count = header_value(irq_path, &mut lines, "long IRQ count:")?;
        expect_line(irq_path, &mut lines, "long IRQ detail (num, latency):")?;
        let irqs = take_pairs(&mut lines);

        let mut lines = storm_contents.lines().peekable();
        expect_line(storm_path, &mut lines, "storm IRQ detail (num, storm_count):")?;
        let storms = take_pairs(&mut lines);

        Ok(Self {
            softirq_count,
            softirqs,
            irq_count,
            irqs,
            storms,
        })
    }
}

fn header_value(
    path: &Path,
    lines: &mut Peekable<Lines<'_>>,
    prefix: &str,
) -> Result<i64, CollectError> {
    lines
        .next()
        .and_then(|l| l.trim().strip_prefix(prefix))
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| CollectError::Format {
            path: path.to_path_buf(),
            reason: format!("missing {prefix:?} header"),
        })
}

fn expect_line(
    path: &Path,
    lines: &mut Peekable<Lines<'_>>,
    want: &str,
) -> Result<(), CollectError> {
    match lines.next() {
        Some(line) if line.trim() == want => Ok(()),
        _ => Err(CollectError::Format {
            path: path.to_path_buf(),
            reason: format!("missing {want:?} line"),
        }),
    }
}

/// Consumes rows until the first line that is not a pair.
fn take_pairs(lines: &mut Peekable<Lines<'_>>) -> Vec<IrqPair> {
    let mut pairs = Vec::new();
    while let Some(pair) = lines.peek().and_then(|l| parse_pair(l)) {
        pairs.push(pair);
        lines.next();
    }
    pairs
}

fn parse_pair(line: &str) -> Option<IrqPair> {
    let mut fields = line.split_whitespace();
    let num = fields.next()?.parse().ok()?;
    let value = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((num, value))
}

fn add_top(
    mut builder: AtomBuilder,
    names: &[(&'static str, &'static str); TOP_IRQS],
    pairs: &[IrqPair],
) -> AtomBuilder {
    for (i, &(num_field, value_field)) in names.iter().enumerate() {
        let (num, value) = pairs.get(i).copied().unwrap_or((-1, 0));
        builder = builder.long(num_field, num).long(value_field, value);
    }
    builder
}

/// Interrupts that ran too long or stormed, reset after each report.
pub struct LongIrq {
    metrics: Option<PathBuf>,
    storm_metrics: Option<PathBuf>,
    stats_reset: Option<PathBuf>,
}

impl LongIrq {
    pub fn new(
        metrics: Option<PathBuf>,
        storm_metrics: Option<PathBuf>,
        stats_reset: Option<PathBuf>,
    ) -> Self {
        Self {
            metrics,
            storm_metrics,
            stats_reset,
        }
    }
}

impl Collector for LongIrq {
    fn name(&self) -> &'static str {
        super::LONG_IRQ
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("long_irq_metrics", self.metrics.as_deref()),
            Source::new("storm_irq_metrics", self.storm_metrics.as_deref()),
            Source::new("irq_stats_reset", self.stats_reset.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let irq_path = require("long_irq_metrics", &self.metrics)?;
        let storm_path = require("storm_irq_metrics", &self.storm_metrics)?;
        let reset_path = require("irq_stats_reset", &self.stats_reset)?;

        let sample = LongIrqSample::parse(
            irq_path,
            &sysfs::read_to_string(irq_path)?,
            storm_path,
            &sysfs::read_to_string(storm_path)?,
        )?;

        let mut builder = AtomKind::LongIrqStats
            .builder()
            .long("long_softirq_count", sample.softirq_count);
        builder = add_top(builder, &SOFTIRQ_FIELDS, &sample.softirqs);
        builder = builder.long("long_irq_count", sample.irq_count);
        builder = add_top(builder, &IRQ_FIELDS, &sample.irqs);
        builder = add_top(builder, &STORM_FIELDS, &sample.storms);
        reporter.build_and_report(builder)?;

        sysfs::write_value(reset_path, "1")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;
    use crate::atom::AtomValue;
    use crate::export::health::HealthMetrics;
    use crate::sink::{CaptureSink, Sink};

    const IRQ: &str = "\
long SOFTIRQ count: 3
long SOFTIRQ detail (num, latency):
3 1200000
7 900000
long IRQ count: 7
long IRQ detail (num, latency):
201 4000000
17 3500000
33 3000000
45 2500000
46 2000000
99 1000000
";

    const STORM: &str = "\
storm IRQ detail (num, storm_count):
120 5000
";

    fn reporter() -> (Reporter, Arc<CaptureSink>) {
        let health = Arc::new(HealthMetrics::new("").unwrap());
        let capture = Arc::new(CaptureSink::new());
        let mut reporter = Reporter::new(health);
        reporter.add_sink(Arc::clone(&capture) as Arc<dyn Sink>);
        (reporter, capture)
    }

    #[test]
    fn test_parse_sample() {
        let p = Path::new("/irq");
        let sample = LongIrqSample::parse(p, IRQ, p, STORM).unwrap();
        assert_eq!(sample.softirq_count, 3);
        assert_eq!(sample.softirqs, vec![(3, 1_200_000), (7, 900_000)]);
        assert_eq!(sample.irq_count, 7);
        assert_eq!(sample.irqs.len(), 6);
        assert_eq!(sample.storms, vec![(120, 5000)]);
    }

    #[test]
    fn test_parse_rejects_missing_sections() {
        let p = Path::new("/irq");
        let err = LongIrqSample::parse(p, "long IRQ count: 1\n", p, STORM).unwrap_err();
        assert!(err.to_string().contains("long SOFTIRQ count:"));

        let truncated = "long SOFTIRQ count: 0\nlong SOFTIRQ detail (num, latency):\n";
        let err = LongIrqSample::parse(p, truncated, p, STORM).unwrap_err();
        assert!(err.to_string().contains("long IRQ count:"));

        let err = LongIrqSample::parse(p, IRQ, p, "120 5000\n").unwrap_err();
        assert!(err.to_string().contains("storm IRQ detail"));
    }

    #[test]
    fn test_parse_pair() {
        assert_eq!(parse_pair("3 1200000"), Some((3, 1_200_000)));
        assert_eq!(parse_pair("  3   -4 "), Some((3, -4)));
        assert_eq!(parse_pair("3"), None);
        assert_eq!(parse_pair("3 4 5"), None);
        assert_eq!(parse_pair("long IRQ count: 2"), None);
    }

    #[test]
    fn test_collect_pads_and_truncates_then_resets() {
        let dir = tempfile::tempdir().unwrap();
        let irq = dir.path().join("long_irq_metrics");
        let storm = dir.path().join("storm_irq_metrics");
        let reset = dir.path().join("stats_reset");
        fs::write(&irq, IRQ).unwrap();
        fs::write(&storm, STORM).unwrap();
        fs::write(&reset, "0").unwrap();
        let (reporter, capture) = reporter();

        LongIrq::new(Some(irq), Some(storm), Some(reset.clone()))
            .collect(&reporter)
            .unwrap();

        let atom = &capture.take()[0];
        assert_eq!(atom.values().len(), 32);
        assert_eq!(atom.get("long_softirq_count"), Some(&AtomValue::Long(3)));
        assert_eq!(atom.get("top2_softirq_num"), Some(&AtomValue::Long(7)));
        assert_eq!(atom.get("top3_softirq_num"), Some(&AtomValue::Long(-1)));
        assert_eq!(atom.get("top3_softirq_latency"), Some(&AtomValue::Long(0)));
        assert_eq!(atom.get("top5_irq_num"), Some(&AtomValue::Long(46)));
        assert_eq!(atom.get("storm_irq_top1_count"), Some(&AtomValue::Long(5000)));
        assert_eq!(atom.get("storm_irq_top2_num"), Some(&AtomValue::Long(-1)));
        assert_eq!(fs::read_to_string(&reset).unwrap(), "1");
    }

    #[test]
    fn test_malformed_file_skips_reset() {
        let dir = tempfile::tempdir().unwrap();
        let irq = dir.path().join("long_irq_metrics");
        let storm = dir.path().join("storm_irq_metrics");
        let reset = dir.path().join("stats_reset");
        fs::write(&irq, "garbage").unwrap();
        fs::write(&storm, STORM).unwrap();
        fs::write(&reset, "0").unwrap();
        let (reporter, capture) = reporter();

        assert!(LongIrq::new(Some(irq), Some(storm), Some(reset.clone()))
            .collect(&reporter)
            .is_err());
        assert!(capture.is_empty());
        assert_eq!(fs::read_to_string(&reset).unwrap(), "0");
    }
}
