//! Daily audio usage tables exported by the audio metrics driver.
//!
//! Each file is a whitespace-separated list of integers indexed by
//! instance, feature, PCM type or codec. Every collector reports one atom
//! per index that saw activity.

use std::path::{Path, PathBuf};

use crate::atom::AtomKind;
use crate::sink::Reporter;

use super::{as_int, require, sysfs, CollectError, Collector, Source};

pub const WAVES_INSTANCES: usize = 5;
pub const WAVES_VOLUME_RANGES: usize = 10;
pub const ADAPTED_INFO_FEATURES: usize = 6;
pub const PCM_TYPES: usize = 19;
pub const BT_CODECS: usize = 5;

const VOLUME_RANGE_FIELDS: [&str; WAVES_VOLUME_RANGES] = [
    "volume_range_0_active_ms_per_day",
    "volume_range_1_active_ms_per_day",
    "volume_range_2_active_ms_per_day",
    "volume_range_3_active_ms_per_day",
    "volume_range_4_active_ms_per_day",
    "volume_range_5_active_ms_per_day",
    "volume_range_6_active_ms_per_day",
    "volume_range_7_active_ms_per_day",
    "volume_range_8_active_ms_per_day",
    "volume_range_9_active_ms_per_day",
];

/// Leading integers of `contents`, stopping at the first non-integer.
pub fn int_stream(contents: &str) -> Vec<i64> {
    contents
        .split_whitespace()
        .map_while(|field| field.parse().ok())
        .collect()
}

fn read_stream(path: &Path) -> Result<Vec<i64>, CollectError> {
    Ok(int_stream(&sysfs::read_to_string(path)?))
}

/// Reads exactly `want` integers.
fn read_exact(path: &Path, want: usize) -> Result<Vec<i64>, CollectError> {
    let values = read_stream(path)?;
    if values.len() != want {
        return Err(CollectError::Format {
            path: path.to_path_buf(),
            reason: format!("{} values, want {want}", values.len()),
        });
    }
    Ok(values)
}

/// Third-party effect active time per instance and volume range.
pub struct AudioWaves {
    path: Option<PathBuf>,
}

impl AudioWaves {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for AudioWaves {
    fn name(&self) -> &'static str {
        super::AUDIO_WAVES
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("waves", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("waves", &self.path)?;
        let values = read_stream(path)?;

        // A trailing partial instance is ignored.
        let instances: Vec<&[i64]> = values.chunks_exact(WAVES_VOLUME_RANGES).collect();
        if instances.len() != WAVES_INSTANCES {
            return Err(CollectError::Format {
                path: path.to_path_buf(),
                reason: format!("{} instances, want {WAVES_INSTANCES}", instances.len()),
            });
        }

        for (instance, durations) in instances.iter().enumerate() {
            if durations.iter().all(|&d| d <= 0) {
                continue;
            }
            let mut builder = AtomKind::AudioThirdPartyEffectStats
                .builder()
                .int("instance", instance as i32);
            for (&field, &duration) in VOLUME_RANGE_FIELDS.iter().zip(durations.iter()) {
                builder = builder.int(field, as_int(duration));
            }
            reporter.build_and_report(builder)?;
        }
        Ok(())
    }
}

/// Activation count and duration per adapted audio feature.
pub struct AudioAdaptedInfo {
    count: Option<PathBuf>,
    duration: Option<PathBuf>,
}

impl AudioAdaptedInfo {
    pub fn new(count: Option<PathBuf>, duration: Option<PathBuf>) -> Self {
        Self { count, duration }
    }
}

impl Collector for AudioAdaptedInfo {
    fn name(&self) -> &'static str {
        super::AUDIO_ADAPTED_INFO
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("adapted_info_count", self.count.as_deref()),
            Source::new("adapted_info_duration", self.duration.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let counts = read_exact(
            require("adapted_info_count", &self.count)?,
            ADAPTED_INFO_FEATURES,
        )?;
        let durations = read_exact(
            require("adapted_info_duration", &self.duration)?,
            ADAPTED_INFO_FEATURES,
        )?;

        for (feature, (&count, &duration)) in counts.iter().zip(durations.iter()).enumerate() {
            if count == 0 && duration == 0 {
                continue;
            }
            reporter.build_and_report(
                AtomKind::AudioAdaptedInfoStats
                    .builder()
                    .int("feature_id", feature as i32)
                    .int("active_counts_per_day", as_int(count))
                    .int("active_duration_ms_per_day", as_int(duration)),
            )?;
        }
        Ok(())
    }
}

/// PCM open latency and active count per PCM type.
pub struct AudioPcm {
    latency: Option<PathBuf>,
    count: Option<PathBuf>,
}

impl AudioPcm {
    pub fn new(latency: Option<PathBuf>, count: Option<PathBuf>) -> Self {
        Self { latency, count }
    }
}

impl Collector for AudioPcm {
    fn name(&self) -> &'static str {
        super::AUDIO_PCM
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("pcm_latency", self.latency.as_deref()),
            Source::new("pcm_count", self.count.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let counts = read_exact(require("pcm_count", &self.count)?, PCM_TYPES)?;
        let latencies = read_exact(require("pcm_latency", &self.latency)?, PCM_TYPES)?;

        for (ty, (&latency, &count)) in latencies.iter().zip(counts.iter()).enumerate() {
            if latency == 0 && count == 0 {
                continue;
            }
            reporter.build_and_report(
                AtomKind::AudioPcmStats
                    .builder()
                    .int("type", ty as i32)
                    .int("pcm_open_latency_avg_ms_per_day", as_int(latency))
                    .int("pcm_active_counts_per_day", as_int(count)),
            )?;
        }
        Ok(())
    }
}

/// Joins two 32-bit words into the high and low halves of a 64-bit value.
fn join_words(high: i64, low: i64) -> i64 {
    ((high as u32 as u64) << 32 | (low as u32 as u64)) as i64
}

/// Active seconds per offloaded effect, keyed by effect UUID.
///
/// The id file holds four 32-bit words per effect, most significant first.
pub struct AudioOffloadEffects {
    id: Option<PathBuf>,
    duration: Option<PathBuf>,
}

impl AudioOffloadEffects {
    pub fn new(id: Option<PathBuf>, duration: Option<PathBuf>) -> Self {
        Self { id, duration }
    }
}

impl Collector for AudioOffloadEffects {
    fn name(&self) -> &'static str {
        super::AUDIO_OFFLOAD_EFFECTS
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("offload_effects_id", self.id.as_deref()),
            Source::new("offload_effects_duration", self.duration.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let id_path = require("offload_effects_id", &self.id)?;
        let words = read_stream(id_path)?;
        let durations = read_stream(require("offload_effects_duration", &self.duration)?)?;

        if words.len() != durations.len() * 4 {
            return Err(CollectError::Format {
                path: id_path.to_path_buf(),
                reason: format!(
                    "{} id words for {} durations, want 4 per effect",
                    words.len(),
                    durations.len()
                ),
            });
        }

        for (uuid, &duration) in words.chunks_exact(4).zip(durations.iter()) {
            let msb = join_words(uuid[0], uuid[1]);
            let lsb = join_words(uuid[2], uuid[3]);
            if msb == 0 && lsb == 0 {
                continue;
            }
            reporter.build_and_report(
                AtomKind::AudioOffloadedEffectStats
                    .builder()
                    .long("effect_uuid_msb", msb)
                    .long("effect_uuid_lsb", lsb)
                    .int("effect_active_seconds_per_day", as_int(duration)),
            )?;
        }
        Ok(())
    }
}

/// Bluetooth media active seconds per codec.
pub struct BluetoothAudioUsage {
    path: Option<PathBuf>,
}

impl BluetoothAudioUsage {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for BluetoothAudioUsage {
    fn name(&self) -> &'static str {
        super::BLUETOOTH_AUDIO_USAGE
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("bluetooth_audio_usage", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("bluetooth_audio_usage", &self.path)?;
        let durations = read_exact(path, BT_CODECS)?;

        for (codec, &seconds) in durations.iter().enumerate() {
            if seconds == 0 {
                continue;
            }
            tracing::debug!(codec, seconds, "bluetooth media usage");
            reporter.build_and_report(
                AtomKind::AudioBtMediaStats
                    .builder()
                    .int("bt_codec_type", codec as i32)
                    .int("active_seconds_per_day", as_int(seconds)),
            )?;
        }
        Ok(())
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

    fn reporter() -> (Reporter, Arc<CaptureSink>) {
        let health = Arc::new(HealthMetrics::new("").unwrap());
        let capture = Arc::new(CaptureSink::new());
        let mut reporter = Reporter::new(health);
        reporter.add_sink(Arc::clone(&capture) as Arc<dyn Sink>);
        (reporter, capture)
    }

    fn ints(values: &[AtomValue]) -> Vec<i64> {
        values.iter().map(|v| v.as_i64().unwrap()).collect()
    }

    fn numbers(values: impl IntoIterator<Item = i64>) -> String {
        values
            .into_iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_int_stream_stops_at_garbage() {
        assert_eq!(int_stream("1 2\n3"), vec![1, 2, 3]);
        assert_eq!(int_stream("1 x 3"), vec![1]);
        assert!(int_stream("").is_empty());
    }

    #[test]
    fn test_waves_skips_idle_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waves");
        let mut values = vec![0i64; WAVES_INSTANCES * WAVES_VOLUME_RANGES];
        values[2 * WAVES_VOLUME_RANGES + 9] = 4500;
        values.extend([7, 7]);
        fs::write(&path, numbers(values)).unwrap();
        let (reporter, capture) = reporter();

        AudioWaves::new(Some(path)).collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 1);
        assert_eq!(
            ints(atoms[0].values()),
            vec![2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 4500]
        );
    }

    #[test]
    fn test_waves_wrong_instance_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waves");
        fs::write(&path, numbers(vec![1; 4 * WAVES_VOLUME_RANGES + 9])).unwrap();
        let (reporter, capture) = reporter();

        let err = AudioWaves::new(Some(path)).collect(&reporter).unwrap_err();
        assert!(err.to_string().contains("4 instances"));
        assert!(capture.is_empty());
    }

    #[test]
    fn test_adapted_info_pairs_count_and_duration() {
        let dir = tempfile::tempdir().unwrap();
        let count = dir.path().join("count");
        let duration = dir.path().join("duration");
        fs::write(&count, "0 3 0 0 0 1").unwrap();
        fs::write(&duration, "0 900 0 0 50 0").unwrap();
        let (reporter, capture) = reporter();

        AudioAdaptedInfo::new(Some(count), Some(duration))
            .collect(&reporter)
            .unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 3);
        assert_eq!(ints(atoms[0].values()), vec![1, 3, 900]);
        assert_eq!(ints(atoms[1].values()), vec![4, 0, 50]);
        assert_eq!(ints(atoms[2].values()), vec![5, 1, 0]);
    }

    #[test]
    fn test_adapted_info_short_file() {
        let dir = tempfile::tempdir().unwrap();
        let count = dir.path().join("count");
        let duration = dir.path().join("duration");
        fs::write(&count, "1 2 3").unwrap();
        fs::write(&duration, "1 2 3 4 5 6").unwrap();
        let (reporter, _) = reporter();

        let err = AudioAdaptedInfo::new(Some(count), Some(duration))
            .collect(&reporter)
            .unwrap_err();
        assert!(err.to_string().contains("3 values, want 6"));
    }

    #[test]
    fn test_pcm_usage() {
        let dir = tempfile::tempdir().unwrap();
        let latency = dir.path().join("latency");
        let count = dir.path().join("count");
        let mut latencies = vec![0i64; PCM_TYPES];
        let mut counts = vec![0i64; PCM_TYPES];
        latencies[18] = 35;
        counts[18] = 12;
        counts[0] = 1;
        fs::write(&latency, numbers(latencies)).unwrap();
        fs::write(&count, numbers(counts)).unwrap();
        let (reporter, capture) = reporter();

        AudioPcm::new(Some(latency), Some(count))
            .collect(&reporter)
            .unwrap();
        let atoms = capture.take();
        assert_eq!(ints(atoms[0].values()), vec![0, 0, 1]);
        assert_eq!(ints(atoms[1].values()), vec![18, 35, 12]);
    }

    #[test]
    fn test_join_words() {
        assert_eq!(join_words(1, 2), (1 << 32) | 2);
        // A negative low word does not clobber the high half.
        assert_eq!(join_words(1, -1), (1 << 32) | 0xffff_ffff);
        assert_eq!(join_words(-1, 0), -(1 << 32));
    }

    #[test]
    fn test_offload_effects() {
        let dir = tempfile::tempdir().unwrap();
        let id = dir.path().join("id");
        let duration = dir.path().join("duration");
        fs::write(&id, "0 0 0 0\n1 2 3 4\n").unwrap();
        fs::write(&duration, "10 20\n").unwrap();
        let (reporter, capture) = reporter();
        let mut c = AudioOffloadEffects::new(Some(id.clone()), Some(duration));

        c.collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 1);
        assert_eq!(
            atoms[0].values(),
            &[
                AtomValue::Long((1 << 32) | 2),
                AtomValue::Long((3 << 32) | 4),
                AtomValue::Int(20)
            ]
        );

        fs::write(&id, "1 2 3\n").unwrap();
        assert!(c.collect(&reporter).is_err());
    }

    #[test]
    fn test_bluetooth_usage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bt_usage");
        let (reporter, capture) = reporter();
        let mut c = BluetoothAudioUsage::new(Some(path.clone()));

        fs::write(&path, "0 600 0 0 30\n").unwrap();
        c.collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 2);
        assert_eq!(ints(atoms[0].values()), vec![1, 600]);
        assert_eq!(ints(atoms[1].values()), vec![4, 30]);

        fs::write(&path, "0 600 0 0\n").unwrap();
        assert!(c.collect(&reporter).is_err());
    }
}
