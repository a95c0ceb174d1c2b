use std::path::{Path, PathBuf};

use crate::atom::hardware::{FAILURE_COMPLETE, TYPE_CODEC};
use crate::atom::AtomKind;
use crate::sink::Reporter;

use super::{as_int, require, sysfs, CollectError, Collector, Source};

/// Audio codec health flag; anything but `0` is a failure.
pub struct CodecFailure {
    location: i32,
    path: Option<PathBuf>,
}

impl CodecFailure {
    pub fn new(location: i32, path: Option<PathBuf>) -> Self {
        Self { location, path }
    }

    fn label(&self) -> &'static str {
        if self.location == 0 {
            "codec"
        } else {
            "codec1"
        }
    }
}

impl Collector for CodecFailure {
    fn name(&self) -> &'static str {
        super::CODEC_FAILURE
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new(self.label(), self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require(self.label(), &self.path)?;
        let state = sysfs::read_to_string(path)?;

        if state.trim() == "0" {
            return Ok(());
        }

        tracing::warn!(path = %path.display(), location = self.location, "codec reports hardware failure");
        reporter.build_and_report(
            AtomKind::HardwareFailed
                .builder()
                .int("hardware_type", TYPE_CODEC)
                .int("hardware_location", self.location)
                .int("failure_code", FAILURE_COMPLETE),
        )?;
        Ok(())
    }
}

/// Last measured left and right speaker impedance.
pub struct SpeakerImpedance {
    path: Option<PathBuf>,
}

impl SpeakerImpedance {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for SpeakerImpedance {
    fn name(&self) -> &'static str {
        super::SPEAKER_IMPEDANCE
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("impedance", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("impedance", &self.path)?;
        let contents = sysfs::read_to_string(path)?;
        let [left, right] = parse_csv::<f32, 2>(path, &contents)?;

        for (location, ohms) in [(0, left), (1, right)] {
            reporter.build_and_report(
                AtomKind::SpeakerImpedance
                    .builder()
                    .int("speaker_location", location)
                    .int("impedance", (ohms * 1000.0) as i32),
            )?;
        }
        Ok(())
    }
}

/// Speech DSP uptime, downtime, crash and recovery counters.
pub struct SpeechDsp {
    path: Option<PathBuf>,
}

impl SpeechDsp {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for SpeechDsp {
    fn name(&self) -> &'static str {
        super::SPEECH_DSP
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("speech_dsp", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("speech_dsp", &self.path)?;
        let contents = sysfs::read_to_string(path)?;
        let [up, down, crashes, recoveries] = parse_csv::<i32, 4>(path, &contents)?;

        tracing::debug!(up, down, crashes, recoveries, "speech DSP stats");

        reporter.build_and_report(
            AtomKind::SpeechDspStat
                .builder()
                .int("total_uptime_millis", up)
                .int("total_downtime_millis", down)
                .int("total_crash_count", crashes)
                .int("total_recover_count", recoveries),
        )?;
        Ok(())
    }
}

/// Speakers carried by the health report.
pub const MAX_SPEAKERS: usize = 4;

/// Parses up to [`MAX_SPEAKERS`] leading comma-separated floats.
///
/// Parsing stops at the first value that is not a number; at least one is
/// required.
fn parse_speaker_values(path: &Path, contents: &str) -> Result<Vec<f32>, CollectError> {
    let values: Vec<f32> = contents
        .trim()
        .split(',')
        .take(MAX_SPEAKERS)
        .map_while(|part| part.trim().parse().ok())
        .collect();
    if values.is_empty() {
        return Err(CollectError::Format {
            path: path.to_path_buf(),
            reason: format!("no speaker values in {:?}", contents.trim()),
        });
    }
    Ok(values)
}

/// Per-speaker impedance, peak temperature, excursion and heartbeat.
pub struct SpeakerHealth {
    impedance: Option<PathBuf>,
    temperature: Option<PathBuf>,
    excursion: Option<PathBuf>,
    heartbeat: Option<PathBuf>,
    version: Option<PathBuf>,
}

impl SpeakerHealth {
    pub fn new(
        impedance: Option<PathBuf>,
        temperature: Option<PathBuf>,
        excursion: Option<PathBuf>,
        heartbeat: Option<PathBuf>,
        version: Option<PathBuf>,
    ) -> Self {
        Self {
            impedance,
            temperature,
            excursion,
            heartbeat,
            version,
        }
    }

    fn version(&self) -> i32 {
        let Some(path) = &self.version else {
            return 0;
        };
        match sysfs::read_int(path) {
            Ok(v) => as_int(v),
            Err(e) => {
                tracing::debug!(error = %e, "speaker version unreadable, using 0");
                0
            }
        }
    }
}

impl Collector for SpeakerHealth {
    fn name(&self) -> &'static str {
        super::SPEAKER_HEALTH
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![
            Source::new("impedance", self.impedance.as_deref()),
            Source::new("speaker_temperature", self.temperature.as_deref()),
            Source::new("speaker_excursion", self.excursion.as_deref()),
            Source::new("speaker_heartbeat", self.heartbeat.as_deref()),
        ]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let read = |label: &'static str, path: &Option<PathBuf>| {
            let path = require(label, path)?;
            parse_speaker_values(path, &sysfs::read_to_string(path)?)
        };
        let impedance = read("impedance", &self.impedance)?;
        let temperature = read("speaker_temperature", &self.temperature)?;
        let excursion = read("speaker_excursion", &self.excursion)?;
        let heartbeat = read("speaker_heartbeat", &self.heartbeat)?;

        if impedance.iter().all(|&ohms| ohms == 0.0) {
            tracing::debug!("speaker impedance not measured yet");
            return Ok(());
        }

        let version = self.version();
        let speakers = [&impedance, &temperature, &excursion, &heartbeat]
            .iter()
            .map(|v| v.len())
            .min()
            .unwrap_or(0);
        let milli = |v: f32| (v * 1000.0) as i32;

        for i in 0..speakers {
            reporter.build_and_report(
                AtomKind::SpeakerHealth
                    .builder()
                    .int("speaker_location", i as i32)
                    .int("impedance", milli(impedance[i]))
                    .int("max_temperature", milli(temperature[i]))
                    .int("excursion", milli(excursion[i]))
                    .int("heartbeat", heartbeat[i] as i32)
                    .int("version", version),
            )?;
        }
        Ok(())
    }
}

/// Parses the leading unsigned integers of `contents`, requiring `N`.
fn parse_counts<const N: usize>(path: &Path, contents: &str) -> Result<[i32; N], CollectError> {
    let format_err = || CollectError::Format {
        path: path.to_path_buf(),
        reason: format!("want {N} counts, got {:?}", contents.trim()),
    };

    let mut out = [0; N];
    let mut fields = contents.split_whitespace();
    for slot in &mut out {
        let field = fields.next().ok_or_else(format_err)?;
        let value: u32 = field.parse().map_err(|_| format_err())?;
        *slot = value as i32;
    }
    Ok(out)
}

/// Reads `path` and parses `N` counts, logging why it could not.
fn optional_counts<const N: usize>(label: &str, path: Option<&Path>) -> Option<[i32; N]> {
    let path = path?;
    let result = sysfs::read_to_string(path).and_then(|c| parse_counts::<N>(path, &c));
    match result {
        Ok(counts) => Some(counts),
        Err(e) => {
            tracing::debug!(source = label, error = %e, "audio hardware counter unavailable");
            None
        }
    }
}

/// Daily AMS rate, CCA activity and call counts.
///
/// Two atoms are reported: source 1 carries the AMS rate, the first CCA pair
/// and voice calls; source 0 carries the second CCA pair and VoIP calls.
pub struct AudioHardware {
    ams_rate: Option<PathBuf>,
    cca_rate: Option<PathBuf>,
    total_call_count: Option<PathBuf>,
}

impl AudioHardware {
    pub fn new(
        ams_rate: Option<PathBuf>,
        cca_rate: Option<PathBuf>,
        total_call_count: Option<PathBuf>,
    ) -> Self {
        Self {
            ams_rate,
            cca_rate,
            total_call_count,
        }
    }
}

impl Collector for AudioHardware {
    fn name(&self) -> &'static str {
        super::AUDIO_HARDWARE
    }

    fn required(&self) -> Vec<Source<'_>> {
        // AMS or CCA alone is enough.
        vec![Source::new(
            "ams_rate",
            self.ams_rate.as_deref().or(self.cca_rate.as_deref()),
        )]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let ams = optional_counts::<1>("ams_rate", self.ams_rate.as_deref());
        let cca = optional_counts::<4>("cca_rate", self.cca_rate.as_deref());
        let [voice, voip] =
            optional_counts::<2>("total_call_count", self.total_call_count.as_deref())
                .unwrap_or_default();

        if ams.is_none() && cca.is_none() {
            tracing::debug!("no ams or cca data to report");
            return Ok(());
        }

        let [ams] = ams.unwrap_or_default();
        let [c1, c2, c3, c4] = cca.unwrap_or_default();
        for (source, ams, active, enable, calls) in
            [(1, ams, c1, c2, voice), (0, 0, c3, c4, voip)]
        {
            reporter.build_and_report(
                AtomKind::AudioHardwareStats
                    .builder()
                    .int("milli_rate_of_ams_per_day", ams)
                    .int("source", source)
                    .int("cca_active_count_per_day", active)
                    .int("cca_enable_count_per_day", enable)
                    .int("total_call_count_per_day", calls),
            )?;
        }
        Ok(())
    }
}

/// Most microphones the PDM state file describes.
pub const MAX_PDM_STATES: usize = 4;

/// Parses a comma-separated list of PDM states. Segments without a leading
/// integer are skipped.
fn parse_pdm_states(contents: &str) -> Vec<i32> {
    contents
        .split(',')
        .filter_map(sysfs::parse_int)
        .map(as_int)
        .collect()
}

/// Microphone background-noise states, one atom per non-zero state.
pub struct AudioPdm {
    path: Option<PathBuf>,
}

impl AudioPdm {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl Collector for AudioPdm {
    fn name(&self) -> &'static str {
        super::AUDIO_PDM
    }

    fn required(&self) -> Vec<Source<'_>> {
        vec![Source::new("pdm_state", self.path.as_deref())]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let path = require("pdm_state", &self.path)?;
        let states = parse_pdm_states(&sysfs::read_to_string(path)?);

        if states.len() > MAX_PDM_STATES {
            return Err(CollectError::Format {
                path: path.to_path_buf(),
                reason: format!("{} states, at most {MAX_PDM_STATES}", states.len()),
            });
        }

        for (index, &state) in states.iter().enumerate() {
            if state == 0 {
                continue;
            }
            reporter.build_and_report(
                AtomKind::AudioPdmStats
                    .builder()
                    .int("pdm_index", index as i32)
                    .int("state", state),
            )?;
        }
        Ok(())
    }
}

/// Parses exactly `N` comma-separated values.
fn parse_csv<T: std::str::FromStr + Copy + Default, const N: usize>(
    path: &Path,
    contents: &str,
) -> Result<[T; N], CollectError> {
    let format_err = || CollectError::Format {
        path: path.to_path_buf(),
        reason: format!("want {N} comma-separated values, got {:?}", contents.trim()),
    };

    let mut out = [T::default(); N];
    let mut parts = contents.trim().split(',');
    for slot in &mut out {
        let part = parts.next().ok_or_else(format_err)?;
        *slot = part.trim().parse().map_err(|_| format_err())?;
    }
    if parts.next().is_some() {
        return Err(format_err());
    }
    Ok(out)
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

    #[test]
    fn test_codec_healthy_and_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codec1_state");
        let (reporter, capture) = reporter();
        let mut c = CodecFailure::new(1, Some(path.clone()));

        fs::write(&path, "0\n").unwrap();
        c.collect(&reporter).unwrap();
        assert!(capture.is_empty());

        fs::write(&path, "1").unwrap();
        c.collect(&reporter).unwrap();
        assert_eq!(
            capture.take()[0].values(),
            &[AtomValue::Int(3), AtomValue::Int(1), AtomValue::Int(1)]
        );
    }

    #[test]
    fn test_speaker_impedance_two_atoms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("impedance");
        fs::write(&path, "6.25,7.5\n").unwrap();
        let (reporter, capture) = reporter();

        SpeakerImpedance::new(Some(path)).collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].values(), &[AtomValue::Int(0), AtomValue::Int(6250)]);
        assert_eq!(atoms[1].values(), &[AtomValue::Int(1), AtomValue::Int(7500)]);
    }

    #[test]
    fn test_speaker_impedance_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("impedance");
        fs::write(&path, "6.25").unwrap();
        let (reporter, capture) = reporter();

        let err = SpeakerImpedance::new(Some(path)).collect(&reporter).unwrap_err();
        assert!(matches!(err, CollectError::Format { .. }));
        assert!(capture.is_empty());
    }

    #[test]
    fn test_speech_dsp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dsp");
        fs::write(&path, "1000,20,3,2\n").unwrap();
        let (reporter, capture) = reporter();

        SpeechDsp::new(Some(path)).collect(&reporter).unwrap();
        assert_eq!(
            capture.take()[0].values(),
            &[
                AtomValue::Int(1000),
                AtomValue::Int(20),
                AtomValue::Int(3),
                AtomValue::Int(2)
            ]
        );
    }

    #[test]
    fn test_parse_csv_rejects_extra() {
        let p = Path::new("/x");
        assert!(parse_csv::<i32, 2>(p, "1,2,3").is_err());
        assert!(parse_csv::<i32, 2>(p, "1,x").is_err());
        assert_eq!(parse_csv::<i32, 2>(p, " 1, 2 ").unwrap(), [1, 2]);
    }

    #[test]
    fn test_parse_speaker_values() {
        let p = Path::new("/x");
        assert_eq!(parse_speaker_values(p, "6.5,7\n").unwrap(), vec![6.5, 7.0]);
        assert_eq!(
            parse_speaker_values(p, "1,2,3,4,5").unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(parse_speaker_values(p, "1,x,3").unwrap(), vec![1.0]);
        assert!(parse_speaker_values(p, "n/a").is_err());
    }

    fn speaker_files(dir: &Path, impedance: &str) -> SpeakerHealth {
        let files = [
            ("impedance", impedance),
            ("temperature", "41.5,39.25"),
            ("excursion", "0.125,0.5"),
            ("heartbeat", "100,101"),
        ];
        for (name, contents) in files {
            fs::write(dir.join(name), contents).unwrap();
        }
        SpeakerHealth::new(
            Some(dir.join("impedance")),
            Some(dir.join("temperature")),
            Some(dir.join("excursion")),
            Some(dir.join("heartbeat")),
            Some(dir.join("version")),
        )
    }

    #[test]
    fn test_speaker_health_per_speaker() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("version"), "3").unwrap();
        let mut c = speaker_files(dir.path(), "6.25,7.5");
        let (reporter, capture) = reporter();

        c.collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 2);
        assert_eq!(
            atoms[1].values(),
            &[
                AtomValue::Int(1),
                AtomValue::Int(7500),
                AtomValue::Int(39250),
                AtomValue::Int(500),
                AtomValue::Int(101),
                AtomValue::Int(3)
            ]
        );
    }

    #[test]
    fn test_speaker_health_unmeasured_and_missing_version() {
        let dir = tempfile::tempdir().unwrap();
        let mut c = speaker_files(dir.path(), "0,0");
        let (reporter, capture) = reporter();

        c.collect(&reporter).unwrap();
        assert!(capture.is_empty());

        // Only one impedance value caps the report at one speaker.
        fs::write(dir.path().join("impedance"), "5.0").unwrap();
        c.collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 1);
        assert_eq!(atoms[0].get("version"), Some(&AtomValue::Int(0)));
    }

    #[test]
    fn test_audio_hardware_two_sources() {
        let dir = tempfile::tempdir().unwrap();
        let ams = dir.path().join("ams_rate");
        let cca = dir.path().join("cca_rate");
        let calls = dir.path().join("call_count");
        fs::write(&ams, "250\n").unwrap();
        fs::write(&cca, "1 2 3 4\n").unwrap();
        fs::write(&calls, "7 9\n").unwrap();
        let (reporter, capture) = reporter();

        AudioHardware::new(Some(ams), Some(cca), Some(calls))
            .collect(&reporter)
            .unwrap();
        let atoms = capture.take();
        let ints = |i: usize| -> Vec<i64> {
            atoms[i].values().iter().map(|v| v.as_i64().unwrap()).collect()
        };
        assert_eq!(ints(0), vec![250, 1, 1, 2, 7]);
        assert_eq!(ints(1), vec![0, 0, 3, 4, 9]);
    }

    #[test]
    fn test_audio_hardware_needs_ams_or_cca() {
        let dir = tempfile::tempdir().unwrap();
        let cca = dir.path().join("cca_rate");
        fs::write(&cca, "1 2 3").unwrap();
        let (reporter, capture) = reporter();
        let mut c = AudioHardware::new(None, Some(cca.clone()), None);

        c.collect(&reporter).unwrap();
        assert!(capture.is_empty());

        fs::write(&cca, "1 2 3 4").unwrap();
        c.collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].get("total_call_count_per_day"), Some(&AtomValue::Int(0)));
    }

    #[test]
    fn test_parse_counts() {
        let p = Path::new("/x");
        assert_eq!(parse_counts::<2>(p, "7 9 11").unwrap(), [7, 9]);
        assert!(parse_counts::<2>(p, "7").is_err());
        assert!(parse_counts::<1>(p, "-3").is_err());
    }

    #[test]
    fn test_pdm_states() {
        assert_eq!(parse_pdm_states("1,0,2,0\n"), vec![1, 0, 2, 0]);
        assert_eq!(parse_pdm_states("1,x,3"), vec![1, 3]);
        assert!(parse_pdm_states("").is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pdm_state");
        let (reporter, capture) = reporter();
        let mut c = AudioPdm::new(Some(path.clone()));

        fs::write(&path, "0,3,0,1").unwrap();
        c.collect(&reporter).unwrap();
        let atoms = capture.take();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].values(), &[AtomValue::Int(1), AtomValue::Int(3)]);
        assert_eq!(atoms[1].values(), &[AtomValue::Int(3), AtomValue::Int(1)]);

        fs::write(&path, "1,1,1,1,1").unwrap();
        assert!(c.collect(&reporter).is_err());
        assert!(capture.is_empty());
    }
}
