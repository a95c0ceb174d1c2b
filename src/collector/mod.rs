pub mod audio;
pub mod audio_usage;
pub mod battery;
pub mod f2fs;
pub mod irq;
pub mod pcie;
pub mod power;
pub mod storage;
pub mod sysfs;
pub mod zram;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::atom::AtomError;
use crate::config::CollectorsConfig;
use crate::scheduler::Cadence;
use crate::sink::Reporter;

pub const ZRAM_MM_STAT: &str = "zram_mm_stat";
pub const ZRAM_BD_STAT: &str = "zram_bd_stat";
pub const BATTERY_CAPACITY: &str = "battery_capacity";
pub const CHARGE_CYCLES: &str = "charge_cycles";
pub const BLOCK_STATS: &str = "block_stats";
pub const CODEC_FAILURE: &str = "codec_failure";
pub const SLOW_IO: &str = "slow_io";
pub const SPEAKER_IMPEDANCE: &str = "speaker_impedance";
pub const SPEECH_DSP: &str = "speech_dsp";
pub const UFS_LIFETIME: &str = "ufs_lifetime";
pub const UFS_RESET_COUNT: &str = "ufs_reset_count";
pub const RESUME_LATENCY: &str = "resume_latency";
pub const PARTITION_USED_SPACE: &str = "partition_used_space";
pub const F2FS_STATS: &str = "f2fs_stats";
pub const F2FS_ATOMIC_WRITE: &str = "f2fs_atomic_write";
pub const F2FS_COMPRESSION: &str = "f2fs_compression";
pub const F2FS_GC_SEGMENT: &str = "f2fs_gc_segment";
pub const LONG_IRQ: &str = "long_irq";
pub const PCIE_LINK: &str = "pcie_link";
pub const SPEAKER_HEALTH: &str = "speaker_health";
pub const AUDIO_HARDWARE: &str = "audio_hardware";
pub const AUDIO_PDM: &str = "audio_pdm";
pub const AUDIO_WAVES: &str = "audio_waves";
pub const AUDIO_ADAPTED_INFO: &str = "audio_adapted_info";
pub const AUDIO_PCM: &str = "audio_pcm";
pub const AUDIO_OFFLOAD_EFFECTS: &str = "audio_offload_effects";
pub const BLUETOOTH_AUDIO_USAGE: &str = "bluetooth_audio_usage";

/// Names accepted in cadence overrides.
pub const ALL_COLLECTOR_NAMES: &[&str] = &[
    ZRAM_MM_STAT,
    ZRAM_BD_STAT,
    BATTERY_CAPACITY,
    CHARGE_CYCLES,
    BLOCK_STATS,
    CODEC_FAILURE,
    SLOW_IO,
    SPEAKER_IMPEDANCE,
    SPEECH_DSP,
    UFS_LIFETIME,
    UFS_RESET_COUNT,
    RESUME_LATENCY,
    PARTITION_USED_SPACE,
    F2FS_STATS,
    F2FS_ATOMIC_WRITE,
    F2FS_COMPRESSION,
    F2FS_GC_SEGMENT,
    LONG_IRQ,
    PCIE_LINK,
    SPEAKER_HEALTH,
    AUDIO_HARDWARE,
    AUDIO_PDM,
    AUDIO_WAVES,
    AUDIO_ADAPTED_INFO,
    AUDIO_PCM,
    AUDIO_OFFLOAD_EFFECTS,
    BLUETOOTH_AUDIO_USAGE,
];

/// Why a collection run produced no atom.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("reading {path}: {source}", path = path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {path}: {reason}", path = path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("unexpected format in {path}: {reason}", path = path.display())]
    Format { path: PathBuf, reason: String },

    #[error("source {0} is not configured")]
    MissingSource(&'static str),

    #[error(transparent)]
    Atom(#[from] AtomError),

    #[error("collector panicked")]
    Panicked,
}

/// One input a collector needs.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    pub label: &'static str,
    pub path: Option<&'a Path>,
}

impl<'a> Source<'a> {
    pub fn new(label: &'static str, path: Option<&'a Path>) -> Self {
        Self { label, path }
    }
}

/// Resolves a configured path or fails with [`CollectError::MissingSource`].
pub(crate) fn require<'a>(
    label: &'static str,
    path: &'a Option<PathBuf>,
) -> Result<&'a Path, CollectError> {
    path.as_deref().ok_or(CollectError::MissingSource(label))
}

/// Narrows to an atom `int` field, saturating out-of-range values.
pub(crate) fn as_int(v: i64) -> i32 {
    v.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// A periodic metric reader.
pub trait Collector: Send {
    /// Name used for logging, metrics and cadence overrides.
    fn name(&self) -> &'static str;

    /// Inputs that must all be configured for the collector to run.
    fn required(&self) -> Vec<Source<'_>>;

    /// Reads current state and reports zero or more atoms.
    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError>;
}

/// Result of one runner invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Collected,
    Skipped,
    Failed,
}

impl RunOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Collected => "collected",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Runs `collector` unless one of its required sources is absent.
pub fn run_collector(collector: &mut dyn Collector, reporter: &Reporter) -> RunOutcome {
    let name = collector.name();

    let missing = collector
        .required()
        .into_iter()
        .find(|s| s.path.is_none())
        .map(|s| s.label);

    let outcome = match missing {
        Some(label) => {
            debug!(collector = name, source = label, "source not configured, skipping");
            RunOutcome::Skipped
        }
        None => match catch_unwind(AssertUnwindSafe(|| collector.collect(reporter)))
            .unwrap_or(Err(CollectError::Panicked))
        {
            Ok(()) => RunOutcome::Collected,
            Err(e) => {
                warn!(collector = name, error = %e, "collection failed");
                RunOutcome::Failed
            }
        },
    };

    reporter
        .health()
        .collector_runs
        .with_label_values(&[name, outcome.as_str()])
        .inc();

    outcome
}

/// Collectors that share a cadence, run in insertion order.
#[derive(Default)]
pub struct CollectorSet {
    collectors: Vec<Box<dyn Collector>>,
}

impl std::fmt::Debug for CollectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.collectors.iter().map(|c| c.name()))
            .finish()
    }
}

impl CollectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, collector: Box<dyn Collector>) {
        self.collectors.push(collector);
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Runs every collector. One failure never stops the rest.
    pub fn run_all(&mut self, reporter: &Reporter) {
        for collector in &mut self.collectors {
            run_collector(collector.as_mut(), reporter);
        }
    }
}

/// Builds every collector from config, grouped by cadence.
///
/// Collectors are created even when their sources are absent; the runner
/// skips them, so enabling a path later only needs a config change.
pub fn build_collectors(cfg: &CollectorsConfig) -> Vec<(Cadence, CollectorSet)> {
    let mut all: Vec<(Cadence, Box<dyn Collector>)> = Vec::new();
    let mut add = |default: Cadence, collector: Box<dyn Collector>| {
        let cadence = cfg.cadence_for(collector.name(), default);
        all.push((cadence, collector));
    };

    add(
        Cadence::Hourly,
        Box::new(zram::ZramMmStat::new(cfg.zram_mm_stat.clone())),
    );
    add(
        Cadence::Hourly,
        Box::new(zram::ZramBdStat::new(cfg.zram_bd_stat.clone())),
    );

    add(
        Cadence::Daily,
        Box::new(battery::BatteryCapacity::new(
            cfg.battery_capacity_cc.clone(),
            cfg.battery_capacity_vfsoc.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(battery::ChargeCycles::new(cfg.charge_cycles.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(storage::BlockStats::new(cfg.block_stat.clone())),
    );
    for (location, path) in [(0, &cfg.codec), (1, &cfg.codec1)] {
        add(
            Cadence::Daily,
            Box::new(audio::CodecFailure::new(location, path.clone())),
        );
    }
    for (op, path) in [
        (storage::SlowIoOperation::Read, &cfg.slow_io.read),
        (storage::SlowIoOperation::Write, &cfg.slow_io.write),
        (storage::SlowIoOperation::Unmap, &cfg.slow_io.unmap),
        (storage::SlowIoOperation::Sync, &cfg.slow_io.sync),
    ] {
        add(Cadence::Daily, Box::new(storage::SlowIo::new(op, path.clone())));
    }
    add(
        Cadence::Daily,
        Box::new(audio::SpeakerImpedance::new(cfg.speaker_impedance.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(audio::SpeechDsp::new(cfg.speech_dsp.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(storage::UfsLifetime::new(
            cfg.ufs_lifetime.a.clone(),
            cfg.ufs_lifetime.b.clone(),
            cfg.ufs_lifetime.c.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(storage::UfsResetCount::new(cfg.ufs_err_stats.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(power::ResumeLatency::new(cfg.resume_latency.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(storage::PartitionUsedSpace::new(
            cfg.partition_used_space.clone(),
        )),
    );

    let f2fs_dir = f2fs::F2fsDir::new(cfg.f2fs_stats.clone(), cfg.mounts.clone());
    add(
        Cadence::Daily,
        Box::new(f2fs::F2fsStats::new(f2fs_dir.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(f2fs::F2fsCompression::new(f2fs_dir.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(f2fs::F2fsGcSegment::new(f2fs_dir.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(f2fs::F2fsAtomicWrite::new(f2fs_dir)),
    );
    add(
        Cadence::Daily,
        Box::new(irq::LongIrq::new(
            cfg.long_irq.metrics.clone(),
            cfg.long_irq.storm_metrics.clone(),
            cfg.long_irq.stats_reset.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(pcie::PcieLink::new(
            cfg.pcie_link.modem.clone(),
            cfg.pcie_link.wifi.clone(),
        )),
    );

    let speaker = &cfg.speaker_health;
    add(
        Cadence::Daily,
        Box::new(audio::SpeakerHealth::new(
            cfg.speaker_impedance.clone(),
            speaker.temperature.clone(),
            speaker.excursion.clone(),
            speaker.heartbeat.clone(),
            speaker.version.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(audio::AudioHardware::new(
            cfg.audio_hardware.ams_rate.clone(),
            cfg.audio_hardware.cca_rate.clone(),
            cfg.audio_hardware.total_call_count.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(audio::AudioPdm::new(cfg.audio_pdm_state.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(audio_usage::AudioWaves::new(cfg.audio_waves.clone())),
    );
    add(
        Cadence::Daily,
        Box::new(audio_usage::AudioAdaptedInfo::new(
            cfg.audio_adapted_info.count.clone(),
            cfg.audio_adapted_info.duration.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(audio_usage::AudioPcm::new(
            cfg.audio_pcm.latency.clone(),
            cfg.audio_pcm.count.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(audio_usage::AudioOffloadEffects::new(
            cfg.audio_offload_effects.id.clone(),
            cfg.audio_offload_effects.duration.clone(),
        )),
    );
    add(
        Cadence::Daily,
        Box::new(audio_usage::BluetoothAudioUsage::new(
            cfg.bluetooth_audio_usage.clone(),
        )),
    );

    let mut sets: Vec<(Cadence, CollectorSet)> = Cadence::ALL
        .iter()
        .map(|&c| (c, CollectorSet::new()))
        .collect();
    for (cadence, collector) in all {
        if let Some((_, set)) = sets.iter_mut().find(|(c, _)| *c == cadence) {
            set.push(collector);
        }
    }

    for (cadence, set) in &sets {
        info!(cadence = %cadence, collectors = ?set.names(), "collectors scheduled");
    }

    sets
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::atom::AtomKind;
    use crate::config::CadenceOverride;
    use crate::export::health::HealthMetrics;
    use crate::sink::{CaptureSink, Sink};

    struct Fixed {
        path: Option<PathBuf>,
        fail: bool,
    }

    impl Collector for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn required(&self) -> Vec<Source<'_>> {
            vec![Source::new("value", self.path.as_deref())]
        }

        fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
            if self.fail {
                return Err(CollectError::Format {
                    path: PathBuf::from("/x"),
                    reason: "bad".to_string(),
                });
            }
            reporter.build_and_report(
                AtomKind::UfsResetCount
                    .builder()
                    .int("host_reset_count", 1),
            )?;
            Ok(())
        }
    }

    fn reporter() -> (Reporter, Arc<CaptureSink>) {
        let health = Arc::new(HealthMetrics::new("").unwrap());
        let capture = Arc::new(CaptureSink::new());
        let mut reporter = Reporter::new(health);
        reporter.add_sink(Arc::clone(&capture) as Arc<dyn Sink>);
        (reporter, capture)
    }

    #[test]
    fn test_runner_skips_missing_source() {
        let (reporter, capture) = reporter();
        let mut c = Fixed {
            path: None,
            fail: false,
        };
        assert_eq!(run_collector(&mut c, &reporter), RunOutcome::Skipped);
        assert!(capture.is_empty());
        assert_eq!(
            reporter
                .health()
                .collector_runs
                .with_label_values(&["fixed", "skipped"])
                .get() as u64,
            1
        );
    }

    #[test]
    fn test_runner_collects_and_fails() {
        let (reporter, capture) = reporter();
        let mut ok = Fixed {
            path: Some(PathBuf::from("/x")),
            fail: false,
        };
        let mut bad = Fixed {
            path: Some(PathBuf::from("/x")),
            fail: true,
        };

        let mut set = CollectorSet::new();
        assert_eq!(run_collector(&mut bad, &reporter), RunOutcome::Failed);
        assert_eq!(run_collector(&mut ok, &reporter), RunOutcome::Collected);
        set.push(Box::new(bad));
        set.push(Box::new(ok));
        set.run_all(&reporter);

        assert_eq!(capture.len(), 2);
    }

    struct Panicking;

    impl Collector for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn required(&self) -> Vec<Source<'_>> {
            Vec::new()
        }

        fn collect(&mut self, _reporter: &Reporter) -> Result<(), CollectError> {
            panic!("counter file vanished mid-read");
        }
    }

    #[test]
    fn test_runner_contains_panicking_collector() {
        let (reporter, capture) = reporter();
        let mut set = CollectorSet::new();
        set.push(Box::new(Panicking));
        set.push(Box::new(Fixed {
            path: Some(PathBuf::from("/x")),
            fail: false,
        }));
        set.run_all(&reporter);

        assert_eq!(capture.len(), 1);
        assert_eq!(
            reporter
                .health()
                .collector_runs
                .with_label_values(&["panicking", "failed"])
                .get() as u64,
            1
        );
        assert_eq!(run_collector(&mut Panicking, &reporter), RunOutcome::Failed);
    }

    #[test]
    fn test_as_int_saturates() {
        assert_eq!(as_int(5), 5);
        assert_eq!(as_int(i64::MAX), i32::MAX);
        assert_eq!(as_int(i64::MIN), i32::MIN);
    }

    #[test]
    fn test_build_collectors_default_cadences() {
        let cfg = CollectorsConfig::default();
        let sets = build_collectors(&cfg);

        let names = |cadence: Cadence| {
            sets.iter()
                .find(|(c, _)| *c == cadence)
                .map(|(_, s)| s.names())
                .unwrap()
        };

        assert!(names(Cadence::FiveMinute).is_empty());
        assert_eq!(names(Cadence::Hourly), vec![ZRAM_MM_STAT, ZRAM_BD_STAT]);
        let daily = names(Cadence::Daily);
        assert_eq!(daily.iter().filter(|n| **n == SLOW_IO).count(), 4);
        assert_eq!(daily.iter().filter(|n| **n == CODEC_FAILURE).count(), 2);
        assert!(daily.contains(&RESUME_LATENCY));
        for name in [
            F2FS_STATS,
            F2FS_ATOMIC_WRITE,
            F2FS_COMPRESSION,
            F2FS_GC_SEGMENT,
            LONG_IRQ,
            PCIE_LINK,
            SPEAKER_HEALTH,
            AUDIO_HARDWARE,
            AUDIO_PDM,
            AUDIO_WAVES,
            AUDIO_ADAPTED_INFO,
            AUDIO_PCM,
            AUDIO_OFFLOAD_EFFECTS,
            BLUETOOTH_AUDIO_USAGE,
        ] {
            assert!(daily.contains(&name), "{name} not scheduled daily");
        }
        assert_eq!(
            daily.len() + names(Cadence::Hourly).len(),
            ALL_COLLECTOR_NAMES.len() + 4
        );
    }

    #[test]
    fn test_build_collectors_honours_overrides() {
        let cfg = CollectorsConfig {
            overrides: vec![CadenceOverride {
                collectors: vec![ZRAM_BD_STAT.to_string(), SLOW_IO.to_string()],
                cadence: Cadence::FiveMinute,
            }],
            ..Default::default()
        };
        let sets = build_collectors(&cfg);
        let five = &sets
            .iter()
            .find(|(c, _)| *c == Cadence::FiveMinute)
            .unwrap()
            .1;
        assert_eq!(five.len(), 5);
    }
}
