use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::collector::ALL_COLLECTOR_NAMES;
use crate::scheduler::Cadence;

/// Top-level configuration for the pixelstatsd daemon.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity used when --log-level is not given. Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Base tick and cadence periods.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Kernel uevent listener and handler inputs.
    #[serde(default)]
    pub uevent: UeventConfig,

    /// Sysfs sources for the periodic collectors.
    #[serde(default)]
    pub collectors: CollectorsConfig,

    /// Atom delivery sinks.
    #[serde(default)]
    pub sinks: SinksConfig,

    /// Prometheus health metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Cadence scheduler configuration.
#[derive(Debug, Deserialize)]
pub struct SchedulerConfig {
    /// Base timer period; every cadence is a multiple of it. Default: 5m.
    #[serde(default = "default_tick_interval", with = "humantime_serde")]
    pub tick_interval: Duration,

    /// Delay before the first collection, giving drivers time to probe. Default: 30s.
    #[serde(default = "default_startup_delay", with = "humantime_serde")]
    pub startup_delay: Duration,

    /// Period of each cadence.
    #[serde(default)]
    pub cadences: CadencePeriods,
}

/// Period of every cadence.
#[derive(Debug, Deserialize)]
pub struct CadencePeriods {
    /// Default: 5m.
    #[serde(default = "default_five_minute_period", with = "humantime_serde")]
    pub five_minute: Duration,

    /// Default: 1h.
    #[serde(default = "default_hourly_period", with = "humantime_serde")]
    pub hourly: Duration,

    /// Default: 24h.
    #[serde(default = "default_daily_period", with = "humantime_serde")]
    pub daily: Duration,
}

/// Uevent listener configuration.
#[derive(Debug, Deserialize)]
pub struct UeventConfig {
    /// Listen for kernel uevents. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Socket receive buffer size in bytes. Default: 64KiB.
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,

    /// Consecutive failed reads before the listener gives up. Default: 10.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,

    /// DEVPATH of the audio driver that reports microphone status.
    #[serde(default)]
    pub audio_uevent: Option<String>,

    /// Directory holding the USB port overheat mitigation counters.
    #[serde(default = "default_overheat_path")]
    pub overheat_path: PathBuf,

    /// KEY=VALUE token that marks a type-C partner uevent.
    #[serde(default = "default_typec_partner_uevent")]
    pub typec_partner_uevent: String,

    /// File holding the partner's ID header VDO.
    #[serde(default = "default_typec_partner_vid_path")]
    pub typec_partner_vid_path: PathBuf,

    /// File holding the partner's product VDO.
    #[serde(default = "default_typec_partner_pid_path")]
    pub typec_partner_pid_path: PathBuf,
}

impl UeventConfig {
    /// Splits `typec_partner_uevent` into key and value.
    pub fn typec_partner_match(&self) -> Option<(&str, &str)> {
        self.typec_partner_uevent
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
    }
}

/// Sources for the periodic collectors. An absent path disables the metric.
#[derive(Debug, Deserialize)]
pub struct CollectorsConfig {
    /// zram mm_stat file.
    #[serde(default)]
    pub zram_mm_stat: Option<PathBuf>,

    /// zram bd_stat file.
    #[serde(default)]
    pub zram_bd_stat: Option<PathBuf>,

    /// Fuel gauge delta coulomb-counter sum.
    #[serde(default)]
    pub battery_capacity_cc: Option<PathBuf>,

    /// Fuel gauge delta VFSOC sum.
    #[serde(default)]
    pub battery_capacity_vfsoc: Option<PathBuf>,

    /// Battery charge cycle bucket counts.
    #[serde(default)]
    pub charge_cycles: Option<PathBuf>,

    /// Block layer stat file. Default: /sys/block/sda/stat.
    #[serde(default = "default_block_stat")]
    pub block_stat: Option<PathBuf>,

    /// Primary audio codec state.
    #[serde(default)]
    pub codec: Option<PathBuf>,

    /// Secondary audio codec state.
    #[serde(default)]
    pub codec1: Option<PathBuf>,

    /// Slow I/O counters per operation.
    #[serde(default)]
    pub slow_io: SlowIoPaths,

    /// Speaker impedance, "left,right" in ohms.
    #[serde(default)]
    pub speaker_impedance: Option<PathBuf>,

    /// Speech DSP uptime/downtime/crash/recover counters.
    #[serde(default)]
    pub speech_dsp: Option<PathBuf>,

    /// UFS device lifetime estimates.
    #[serde(default)]
    pub ufs_lifetime: UfsLifetimePaths,

    /// UFS host error counters summed into the host reset count.
    #[serde(default)]
    pub ufs_err_stats: Vec<PathBuf>,

    /// Suspend/resume latency histogram.
    #[serde(default)]
    pub resume_latency: Option<PathBuf>,

    /// Mount point whose used space is reported. Default: /mnt/vendor/persist.
    #[serde(default = "default_partition_used_space")]
    pub partition_used_space: Option<PathBuf>,

    /// F2FS sysfs root such as /sys/fs/f2fs; the userdata block name is appended.
    #[serde(default)]
    pub f2fs_stats: Option<PathBuf>,

    /// Mount table used to find the block device behind /data.
    #[serde(default = "default_mounts")]
    pub mounts: PathBuf,

    /// Long and storm IRQ statistics.
    #[serde(default)]
    pub long_irq: LongIrqPaths,

    /// PCIe link statistics directories.
    #[serde(default)]
    pub pcie_link: PcieLinkPaths,

    /// Per-speaker health files, read together with `speaker_impedance`.
    #[serde(default)]
    pub speaker_health: SpeakerHealthPaths,

    /// Audio AMS, CCA and call counters.
    #[serde(default)]
    pub audio_hardware: AudioHardwarePaths,

    /// Microphone PDM states, comma separated.
    #[serde(default)]
    pub audio_pdm_state: Option<PathBuf>,

    /// Third-party effect active time per instance and volume range.
    #[serde(default)]
    pub audio_waves: Option<PathBuf>,

    /// Adapted audio feature counters.
    #[serde(default)]
    pub audio_adapted_info: CountDurationPaths,

    /// PCM open latency and active counts.
    #[serde(default)]
    pub audio_pcm: PcmUsagePaths,

    /// Offloaded effect UUIDs and active durations.
    #[serde(default)]
    pub audio_offload_effects: OffloadEffectsPaths,

    /// Bluetooth media active seconds per codec.
    #[serde(default)]
    pub bluetooth_audio_usage: Option<PathBuf>,

    /// Moves collectors to a non-default cadence.
    #[serde(default)]
    pub overrides: Vec<CadenceOverride>,
}

/// Slow I/O counter files.
#[derive(Debug, Default, Deserialize)]
pub struct SlowIoPaths {
    #[serde(default)]
    pub read: Option<PathBuf>,
    #[serde(default)]
    pub write: Option<PathBuf>,
    #[serde(default)]
    pub unmap: Option<PathBuf>,
    #[serde(default)]
    pub sync: Option<PathBuf>,
}

/// UFS lifetime estimate files.
#[derive(Debug, Default, Deserialize)]
pub struct UfsLifetimePaths {
    #[serde(default)]
    pub a: Option<PathBuf>,
    #[serde(default)]
    pub b: Option<PathBuf>,
    #[serde(default)]
    pub c: Option<PathBuf>,
}

/// Long IRQ statistics files.
#[derive(Debug, Default, Deserialize)]
pub struct LongIrqPaths {
    #[serde(default)]
    pub metrics: Option<PathBuf>,
    #[serde(default)]
    pub storm_metrics: Option<PathBuf>,
    /// Written with `1` after a report.
    #[serde(default)]
    pub stats_reset: Option<PathBuf>,
}

/// PCIe link statistics directories. Either may be absent.
#[derive(Debug, Default, Deserialize)]
pub struct PcieLinkPaths {
    #[serde(default)]
    pub modem: Option<PathBuf>,
    #[serde(default)]
    pub wifi: Option<PathBuf>,
}

/// Speaker health files, up to four comma-separated values each.
#[derive(Debug, Default, Deserialize)]
pub struct SpeakerHealthPaths {
    #[serde(default)]
    pub temperature: Option<PathBuf>,
    #[serde(default)]
    pub excursion: Option<PathBuf>,
    #[serde(default)]
    pub heartbeat: Option<PathBuf>,
    /// Optional; version 0 when absent or unreadable.
    #[serde(default)]
    pub version: Option<PathBuf>,
}

/// Audio hardware counters. At least one of AMS or CCA must be set.
#[derive(Debug, Default, Deserialize)]
pub struct AudioHardwarePaths {
    #[serde(default)]
    pub ams_rate: Option<PathBuf>,
    #[serde(default)]
    pub cca_rate: Option<PathBuf>,
    #[serde(default)]
    pub total_call_count: Option<PathBuf>,
}

/// Paired count and duration files.
#[derive(Debug, Default, Deserialize)]
pub struct CountDurationPaths {
    #[serde(default)]
    pub count: Option<PathBuf>,
    #[serde(default)]
    pub duration: Option<PathBuf>,
}

/// PCM usage files.
#[derive(Debug, Default, Deserialize)]
pub struct PcmUsagePaths {
    #[serde(default)]
    pub latency: Option<PathBuf>,
    #[serde(default)]
    pub count: Option<PathBuf>,
}

/// Offloaded effect files.
#[derive(Debug, Default, Deserialize)]
pub struct OffloadEffectsPaths {
    #[serde(default)]
    pub id: Option<PathBuf>,
    #[serde(default)]
    pub duration: Option<PathBuf>,
}

/// Assigns a list of collectors to a cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct CadenceOverride {
    /// Collector names, e.g. "zram_mm_stat".
    pub collectors: Vec<String>,

    /// Target cadence.
    pub cadence: Cadence,
}

impl CollectorsConfig {
    /// Cadence for `name`, honouring overrides.
    pub fn cadence_for(&self, name: &str, default: Cadence) -> Cadence {
        self.overrides
            .iter()
            .find(|o| o.collectors.iter().any(|c| c == name))
            .map(|o| o.cadence)
            .unwrap_or(default)
    }
}

/// Atom delivery sink configuration.
#[derive(Debug, Default, Deserialize)]
pub struct SinksConfig {
    /// Log sink configuration.
    #[serde(default)]
    pub log: LogSinkConfig,

    /// HTTP NDJSON sink configuration.
    #[serde(default)]
    pub http: HttpSinkConfig,
}

/// Log sink configuration.
#[derive(Debug, Deserialize)]
pub struct LogSinkConfig {
    /// Log every atom at info level. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// HTTP sink configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpSinkConfig {
    /// Enable the HTTP sink. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoint to POST batches to.
    #[serde(default)]
    pub address: String,

    /// Additional HTTP headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Compression algorithm (none, gzip, zlib). Default: gzip.
    #[serde(default = "default_compression")]
    pub compression: String,

    /// Maximum atoms per batch. Default: 64.
    #[serde(default = "default_http_batch_size")]
    pub batch_size: usize,

    /// Maximum wait before sending a partial batch. Default: 10s.
    #[serde(default = "default_http_batch_timeout", with = "humantime_serde")]
    pub batch_timeout: Duration,

    /// Maximum duration of one request. Default: 30s.
    #[serde(default = "default_http_export_timeout", with = "humantime_serde")]
    pub export_timeout: Duration,

    /// Maximum atoms to queue (dropped if full). Default: 1024.
    #[serde(default = "default_http_max_queue_size")]
    pub max_queue_size: usize,

    /// Number of concurrent requests. Default: 1.
    #[serde(default = "default_http_workers")]
    pub workers: usize,
}

/// Prometheus health metrics server configuration.
#[derive(Debug, Deserialize)]
pub struct HealthConfig {
    /// Serve /metrics and /healthz. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9090".
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_startup_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_five_minute_period() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_hourly_period() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_daily_period() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_receive_buffer_size() -> usize {
    64 * 1024
}

fn default_max_consecutive_errors() -> u32 {
    10
}

fn default_overheat_path() -> PathBuf {
    PathBuf::from("/sys/devices/platform/google,usbc_port_cooling_dev")
}

fn default_typec_partner_uevent() -> String {
    "DEVTYPE=typec_partner".to_string()
}

fn default_typec_partner_vid_path() -> PathBuf {
    PathBuf::from("/sys/class/typec/port0-partner/identity/id_header")
}

fn default_typec_partner_pid_path() -> PathBuf {
    PathBuf::from("/sys/class/typec/port0-partner/identity/product")
}

fn default_block_stat() -> Option<PathBuf> {
    Some(PathBuf::from("/sys/block/sda/stat"))
}

fn default_partition_used_space() -> Option<PathBuf> {
    Some(PathBuf::from("/mnt/vendor/persist"))
}

fn default_mounts() -> PathBuf {
    PathBuf::from("/proc/mounts")
}

fn default_compression() -> String {
    "gzip".to_string()
}

fn default_http_batch_size() -> usize {
    64
}

fn default_http_batch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_http_export_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_http_max_queue_size() -> usize {
    1024
}

fn default_http_workers() -> usize {
    1
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

// --- Default impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            scheduler: SchedulerConfig::default(),
            uevent: UeventConfig::default(),
            collectors: CollectorsConfig::default(),
            sinks: SinksConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            startup_delay: default_startup_delay(),
            cadences: CadencePeriods::default(),
        }
    }
}

impl Default for CadencePeriods {
    fn default() -> Self {
        Self {
            five_minute: default_five_minute_period(),
            hourly: default_hourly_period(),
            daily: default_daily_period(),
        }
    }
}

impl CadencePeriods {
    /// Periods in cadence order.
    pub fn as_list(&self) -> [(Cadence, Duration); 3] {
        [
            (Cadence::FiveMinute, self.five_minute),
            (Cadence::Hourly, self.hourly),
            (Cadence::Daily, self.daily),
        ]
    }
}

impl Default for UeventConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            receive_buffer_size: default_receive_buffer_size(),
            max_consecutive_errors: default_max_consecutive_errors(),
            audio_uevent: None,
            overheat_path: default_overheat_path(),
            typec_partner_uevent: default_typec_partner_uevent(),
            typec_partner_vid_path: default_typec_partner_vid_path(),
            typec_partner_pid_path: default_typec_partner_pid_path(),
        }
    }
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            zram_mm_stat: None,
            zram_bd_stat: None,
            battery_capacity_cc: None,
            battery_capacity_vfsoc: None,
            charge_cycles: None,
            block_stat: default_block_stat(),
            codec: None,
            codec1: None,
            slow_io: SlowIoPaths::default(),
            speaker_impedance: None,
            speech_dsp: None,
            ufs_lifetime: UfsLifetimePaths::default(),
            ufs_err_stats: Vec::new(),
            resume_latency: None,
            partition_used_space: default_partition_used_space(),
            f2fs_stats: None,
            mounts: default_mounts(),
            long_irq: LongIrqPaths::default(),
            pcie_link: PcieLinkPaths::default(),
            speaker_health: SpeakerHealthPaths::default(),
            audio_hardware: AudioHardwarePaths::default(),
            audio_pdm_state: None,
            audio_waves: None,
            audio_adapted_info: CountDurationPaths::default(),
            audio_pcm: PcmUsagePaths::default(),
            audio_offload_effects: OffloadEffectsPaths::default(),
            bluetooth_audio_usage: None,
            overrides: Vec::new(),
        }
    }
}

impl Default for LogSinkConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            headers: HashMap::new(),
            compression: default_compression(),
            batch_size: default_http_batch_size(),
            batch_timeout: default_http_batch_timeout(),
            export_timeout: default_http_export_timeout(),
            max_queue_size: default_http_max_queue_size(),
            workers: default_http_workers(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        Self::from_yaml(&data).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(data: &str) -> Result<Self> {
        let cfg: Config = serde_yaml::from_str(data).context("decoding YAML")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        let tick = self.scheduler.tick_interval;
        if tick.is_zero() {
            bail!("scheduler.tick_interval must be positive");
        }

        let tick_nanos = tick.as_nanos();
        for (cadence, period) in self.scheduler.cadences.as_list() {
            if period < tick {
                bail!(
                    "scheduler.cadences.{} period {:?} must not be shorter than tick interval {:?}",
                    cadence.as_str(),
                    period,
                    tick
                );
            }
            if period.as_nanos() % tick_nanos != 0 {
                bail!(
                    "scheduler.cadences.{} period {:?} must be an exact multiple of tick interval {:?}",
                    cadence.as_str(),
                    period,
                    tick
                );
            }
        }

        if self.uevent.enabled {
            if self.uevent.max_consecutive_errors == 0 {
                bail!("uevent.max_consecutive_errors must be positive");
            }
            if self.uevent.receive_buffer_size == 0 {
                bail!("uevent.receive_buffer_size must be positive");
            }
            if self.uevent.typec_partner_match().is_none() {
                bail!(
                    "uevent.typec_partner_uevent must be KEY=VALUE, got {:?}",
                    self.uevent.typec_partner_uevent
                );
            }
        }

        let valid_names: HashSet<&str> = ALL_COLLECTOR_NAMES.iter().copied().collect();
        let mut overridden = HashSet::new();
        for cadence_override in &self.collectors.overrides {
            if cadence_override.collectors.is_empty() {
                bail!(
                    "cadence override for {} lists no collectors",
                    cadence_override.cadence.as_str()
                );
            }

            for name in &cadence_override.collectors {
                if !valid_names.contains(name.as_str()) {
                    bail!("unknown collector in cadence override: {name}");
                }

                if !overridden.insert(name.as_str()) {
                    bail!("collector appears in more than one override: {name}");
                }
            }
        }

        // Validate HTTP sink config if enabled.
        let http = &self.sinks.http;
        if http.enabled {
            if http.address.is_empty() {
                bail!("sinks.http.address is required when enabled");
            }
            if http.max_queue_size == 0 {
                bail!("sinks.http.max_queue_size must be positive when enabled");
            }
            if http.batch_size == 0 {
                bail!("sinks.http.batch_size must be positive when enabled");
            }
            if http.workers == 0 {
                bail!("sinks.http.workers must be positive when enabled");
            }
            if http.batch_timeout.is_zero() {
                bail!("sinks.http.batch_timeout must be positive when enabled");
            }
            if http.export_timeout.is_zero() {
                bail!("sinks.http.export_timeout must be positive when enabled");
            }

            match http.compression.as_str() {
                "none" | "gzip" | "zlib" => {}
                other => bail!("invalid compression type: {other}"),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.scheduler.tick_interval, Duration::from_secs(300));
        assert_eq!(cfg.scheduler.startup_delay, Duration::from_secs(30));
        assert_eq!(cfg.uevent.max_consecutive_errors, 10);
        assert_eq!(cfg.uevent.receive_buffer_size, 64 * 1024);
        assert_eq!(cfg.health.addr, ":9090");
        assert!(cfg.sinks.log.enabled);
        assert!(!cfg.sinks.http.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let cfg = Config::from_yaml("{}").unwrap();
        assert_eq!(cfg.scheduler.cadences.daily, Duration::from_secs(86_400));
        assert_eq!(
            cfg.collectors.block_stat.as_deref(),
            Some(Path::new("/sys/block/sda/stat"))
        );
        assert!(cfg.collectors.zram_mm_stat.is_none());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
log_level: debug
scheduler:
  tick_interval: 1m
  startup_delay: 0s
  cadences:
    five_minute: 5m
    hourly: 1h
    daily: 24h
uevent:
  audio_uevent: /devices/platform/audio
  typec_partner_uevent: DEVTYPE=typec_partner
collectors:
  zram_mm_stat: /sys/block/zram0/mm_stat
  slow_io:
    read: /sys/devices/platform/ufs/slowio_read_cnt
  ufs_err_stats:
    - /sys/devices/platform/ufs/err_stats/host_reset
    - /sys/devices/platform/ufs/err_stats/link_startup
  overrides:
    - collectors: [zram_mm_stat, zram_bd_stat]
      cadence: five_minute
sinks:
  http:
    enabled: true
    address: http://collector:8080/atoms
    compression: zlib
health:
  enabled: true
  addr: 127.0.0.1:9102
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.scheduler.tick_interval, Duration::from_secs(60));
        assert_eq!(cfg.uevent.audio_uevent.as_deref(), Some("/devices/platform/audio"));
        assert_eq!(cfg.collectors.ufs_err_stats.len(), 2);
        assert!(cfg.collectors.slow_io.read.is_some());
        assert!(cfg.collectors.slow_io.write.is_none());
        assert_eq!(
            cfg.collectors.cadence_for("zram_bd_stat", Cadence::Hourly),
            Cadence::FiveMinute
        );
        assert_eq!(
            cfg.collectors.cadence_for("block_stats", Cadence::Daily),
            Cadence::Daily
        );
        assert!(cfg.sinks.http.enabled);
        assert!(cfg.health.enabled);
    }

    #[test]
    fn test_parse_nested_collector_paths() {
        let yaml = r#"
collectors:
  f2fs_stats: /sys/fs/f2fs
  mounts: /tmp/mounts
  long_irq:
    metrics: /sys/kernel/metrics/irq/long_irq_metrics
    storm_metrics: /sys/kernel/metrics/irq/storm_irq_metrics
    stats_reset: /sys/kernel/metrics/irq/stats_reset
  pcie_link:
    wifi: /sys/devices/platform/pcie1/link_stats
  audio_pcm:
    latency: /sys/kernel/audiometrics/pcm_latency
    count: /sys/kernel/audiometrics/pcm_count
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.collectors.mounts, PathBuf::from("/tmp/mounts"));
        assert!(cfg.collectors.long_irq.stats_reset.is_some());
        assert!(cfg.collectors.pcie_link.modem.is_none());
        assert!(cfg.collectors.pcie_link.wifi.is_some());
        assert!(cfg.collectors.audio_pcm.count.is_some());
        assert!(cfg.collectors.audio_offload_effects.id.is_none());

        assert_eq!(
            cfg.collectors.f2fs_stats.as_deref(),
            Some(Path::new("/sys/fs/f2fs"))
        );

        let cfg = Config::default();
        assert!(cfg.collectors.f2fs_stats.is_none());
        assert_eq!(cfg.collectors.mounts, PathBuf::from("/proc/mounts"));
    }

    #[test]
    fn test_validate_zero_tick() {
        let mut cfg = valid_config();
        cfg.scheduler.tick_interval = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tick_interval must be positive"));
    }

    #[test]
    fn test_validate_period_not_multiple_of_tick() {
        let mut cfg = valid_config();
        cfg.scheduler.cadences.hourly = Duration::from_secs(62 * 60);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("exact multiple"));
    }

    #[test]
    fn test_validate_period_shorter_than_tick() {
        let mut cfg = valid_config();
        cfg.scheduler.cadences.five_minute = Duration::from_secs(60);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must not be shorter"));
    }

    #[test]
    fn test_validate_sub_millisecond_tick() {
        let mut cfg = valid_config();
        cfg.scheduler.tick_interval = Duration::from_micros(500);
        cfg.scheduler.cadences.five_minute = Duration::from_millis(1);
        cfg.scheduler.cadences.hourly = Duration::from_millis(12);
        cfg.scheduler.cadences.daily = Duration::from_millis(288);
        assert!(cfg.validate().is_ok());

        cfg.scheduler.cadences.hourly = Duration::from_micros(12_250);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("exact multiple"));
    }

    #[test]
    fn test_parse_sub_millisecond_tick_yaml() {
        let yaml = r#"
scheduler:
  tick_interval: 500us
  cadences:
    five_minute: 1ms
    hourly: 12ms
    daily: 288ms
"#;
        let cfg = Config::from_yaml(yaml).unwrap();
        assert_eq!(cfg.scheduler.tick_interval, Duration::from_micros(500));
    }

    #[test]
    fn test_validate_max_consecutive_errors() {
        let mut cfg = valid_config();
        cfg.uevent.max_consecutive_errors = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_consecutive_errors"));

        cfg.uevent.enabled = false;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_typec_partner_uevent() {
        let mut cfg = valid_config();
        cfg.uevent.typec_partner_uevent = "typec_partner".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));

        cfg.uevent.typec_partner_uevent = "=typec_partner".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_unknown_override_collector() {
        let mut cfg = valid_config();
        cfg.collectors.overrides.push(CadenceOverride {
            collectors: vec!["gpu_freq".to_string()],
            cadence: Cadence::Hourly,
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("unknown collector"));
    }

    #[test]
    fn test_validate_duplicate_override_collector() {
        let mut cfg = valid_config();
        cfg.collectors.overrides = vec![
            CadenceOverride {
                collectors: vec!["slow_io".to_string()],
                cadence: Cadence::Hourly,
            },
            CadenceOverride {
                collectors: vec!["slow_io".to_string()],
                cadence: Cadence::FiveMinute,
            },
        ];
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("more than one override"));
    }

    #[test]
    fn test_validate_empty_override() {
        let mut cfg = valid_config();
        cfg.collectors.overrides.push(CadenceOverride {
            collectors: Vec::new(),
            cadence: Cadence::Daily,
        });
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("lists no collectors"));
    }

    #[test]
    fn test_validate_http_requires_address() {
        let mut cfg = valid_config();
        cfg.sinks.http.enabled = true;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("address is required"));

        cfg.sinks.http.address = "http://localhost:8080".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_http_compression() {
        let mut cfg = valid_config();
        cfg.sinks.http.enabled = true;
        cfg.sinks.http.address = "http://localhost:8080".to_string();
        cfg.sinks.http.compression = "snappy".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("invalid compression type"));
    }

    #[test]
    fn test_validate_http_timeouts() {
        let mut cfg = valid_config();
        cfg.sinks.http.enabled = true;
        cfg.sinks.http.address = "http://localhost:8080".to_string();

        cfg.sinks.http.batch_timeout = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("batch_timeout must be positive"));

        cfg.sinks.http.batch_timeout = Duration::from_secs(5);
        cfg.sinks.http.export_timeout = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("export_timeout must be positive"));

        let yaml = r#"
sinks:
  http:
    enabled: true
    address: http://localhost:8080
    batch_timeout: 0s
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/pixelstatsd.yaml")).unwrap_err();
        assert!(err.to_string().contains("reading config file"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "scheduler:\n  startup_delay: 1s\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.scheduler.startup_delay, Duration::from_secs(1));
    }
}
