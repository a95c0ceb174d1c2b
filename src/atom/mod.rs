//! Structured telemetry records ("atoms") and their schemas.
//!
//! An atom is a schema identifier plus an ordered list of typed values.
//! Producers never index into value slots directly: they name each field on
//! an [`AtomBuilder`], and [`AtomBuilder::build`] resolves the order against
//! the schema of the atom's [`AtomKind`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Scalar type of an atom field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Int,
    Long,
    Float,
    String,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::String => "string",
        };
        f.write_str(name)
    }
}

/// A single typed atom value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AtomValue {
    Int(i32),
    Long(i64),
    Float(f32),
    String(String),
}

impl AtomValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Long(_) => ValueType::Long,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
        }
    }

    /// Integer view of `Int` and `Long` values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AtomValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v:?}"),
        }
    }
}

/// Field declaration inside a [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: ValueType,
}

const fn field(name: &'static str, ty: ValueType) -> FieldSpec {
    FieldSpec { name, ty }
}

/// Ordered field layout of an atom.
///
/// `repeated` describes an optional variable-length tail (e.g. histogram
/// buckets) that follows the fixed fields.
#[derive(Debug)]
pub struct Schema {
    pub fields: &'static [FieldSpec],
    pub repeated: Option<FieldSpec>,
}

use ValueType::{Int as I, Long as L, String as S};

static HARDWARE_FAILED: Schema = Schema {
    fields: &[
        field("hardware_type", I),
        field("hardware_location", I),
        field("failure_code", I),
    ],
    repeated: None,
};

static USB_PORT_OVERHEAT: Schema = Schema {
    fields: &[
        field("plug_temperature_deci_c", I),
        field("max_temperature_deci_c", I),
        field("time_to_overheat_secs", I),
        field("time_to_hysteresis_secs", I),
        field("time_to_inactive_secs", I),
    ],
    repeated: None,
};

static PD_VID_PID: Schema = Schema {
    fields: &[field("vid", I), field("pid", I)],
    repeated: None,
};

static THERMAL_SENSOR_ABNORMALITY: Schema = Schema {
    fields: &[field("type", I), field("sensor", S), field("value", I)],
    repeated: None,
};

static ZRAM_MM_STAT: Schema = Schema {
    fields: &[
        field("orig_data_size", L),
        field("compr_data_size", L),
        field("mem_used_total", L),
        field("same_pages", L),
        field("huge_pages", L),
        field("huge_pages_since_boot", L),
    ],
    repeated: None,
};

static ZRAM_BD_STAT: Schema = Schema {
    fields: &[
        field("bd_count", L),
        field("bd_reads", L),
        field("bd_writes", L),
    ],
    repeated: None,
};

static BATTERY_CAPACITY: Schema = Schema {
    fields: &[field("delta_cc_sum", I), field("delta_vfsoc_sum", I)],
    repeated: None,
};

static CHARGE_CYCLES: Schema = Schema {
    fields: &[],
    repeated: Some(field("cycle_bucket", I)),
};

static BLOCK_STATS: Schema = Schema {
    fields: &[
        field("read_io", L),
        field("read_sectors", L),
        field("read_ticks", L),
        field("write_io", L),
        field("write_sectors", L),
        field("write_ticks", L),
    ],
    repeated: None,
};

static SLOW_IO: Schema = Schema {
    fields: &[field("operation", I), field("count", I)],
    repeated: None,
};

static SPEAKER_IMPEDANCE: Schema = Schema {
    fields: &[field("speaker_location", I), field("impedance", I)],
    repeated: None,
};

static SPEECH_DSP_STAT: Schema = Schema {
    fields: &[
        field("total_uptime_millis", I),
        field("total_downtime_millis", I),
        field("total_crash_count", I),
        field("total_recover_count", I),
    ],
    repeated: None,
};

static UFS_LIFETIME: Schema = Schema {
    fields: &[
        field("lifetime_a", I),
        field("lifetime_b", I),
        field("lifetime_c", I),
    ],
    repeated: None,
};

static UFS_RESET_COUNT: Schema = Schema {
    fields: &[field("host_reset_count", I)],
    repeated: None,
};

static RESUME_LATENCY: Schema = Schema {
    fields: &[field("max_latency", L), field("avg_latency", L)],
    repeated: Some(field("bucket_count", L)),
};

static PARTITION_USED_SPACE: Schema = Schema {
    fields: &[
        field("directory", I),
        field("free_bytes", L),
        field("total_bytes", L),
    ],
    repeated: None,
};

static F2FS_STATS: Schema = Schema {
    fields: &[
        field("dirty_segments", I),
        field("free_segments", I),
        field("cp_calls_fg", I),
        field("cp_calls_bg", I),
        field("gc_calls_fg", I),
        field("gc_calls_bg", I),
        field("moved_blocks_fg", I),
        field("moved_blocks_bg", I),
        field("valid_blocks", I),
    ],
    repeated: None,
};

static F2FS_ATOMIC_WRITE_INFO: Schema = Schema {
    fields: &[
        field("peak_atomic_write", I),
        field("committed_atomic_block", I),
        field("revoked_atomic_block", I),
    ],
    repeated: None,
};

static F2FS_COMPRESSION_INFO: Schema = Schema {
    fields: &[
        field("compr_written_blocks", I),
        field("compr_saved_blocks", I),
        field("compr_new_inodes", I),
    ],
    repeated: None,
};

static F2FS_GC_SEGMENT_INFO: Schema = Schema {
    fields: &[
        field("reclaimed_segments_normal", I),
        field("reclaimed_segments_urgent_high", I),
        field("reclaimed_segments_urgent_low", I),
        field("reclaimed_segments_urgent_mid", I),
    ],
    repeated: None,
};

// Count, then the five worst (irq, value) pairs per table.
static LONG_IRQ_STATS: Schema = Schema {
    fields: &[
        field("long_softirq_count", L),
        field("top1_softirq_num", L),
        field("top1_softirq_latency", L),
        field("top2_softirq_num", L),
        field("top2_softirq_latency", L),
        field("top3_softirq_num", L),
        field("top3_softirq_latency", L),
        field("top4_softirq_num", L),
        field("top4_softirq_latency", L),
        field("top5_softirq_num", L),
        field("top5_softirq_latency", L),
        field("long_irq_count", L),
        field("top1_irq_num", L),
        field("top1_irq_latency", L),
        field("top2_irq_num", L),
        field("top2_irq_latency", L),
        field("top3_irq_num", L),
        field("top3_irq_latency", L),
        field("top4_irq_num", L),
        field("top4_irq_latency", L),
        field("top5_irq_num", L),
        field("top5_irq_latency", L),
        field("storm_irq_top1_num", L),
        field("storm_irq_top1_count", L),
        field("storm_irq_top2_num", L),
        field("storm_irq_top2_count", L),
        field("storm_irq_top3_num", L),
        field("storm_irq_top3_count", L),
        field("storm_irq_top4_num", L),
        field("storm_irq_top4_count", L),
        field("storm_irq_top5_num", L),
        field("storm_irq_top5_count", L),
    ],
    repeated: None,
};

static PCIE_LINK_STATS: Schema = Schema {
    fields: &[
        field("modem_pcie_linkdowns", I),
        field("wifi_pcie_linkdowns", I),
        field("modem_pcie_completion_timeouts", I),
        field("wifi_pcie_completion_timeouts", I),
        field("modem_pcie_linkup_failures", I),
        field("wifi_pcie_linkup_failures", I),
        field("modem_pcie_link_recovery_failures", I),
        field("wifi_pcie_link_recovery_failures", I),
        field("modem_pcie_pll_lock_avg", I),
        field("wifi_pcie_pll_lock_avg", I),
        field("modem_pcie_link_up_avg", I),
        field("wifi_pcie_link_up_avg", I),
    ],
    repeated: None,
};

static SPEAKER_HEALTH: Schema = Schema {
    fields: &[
        field("speaker_location", I),
        field("impedance", I),
        field("max_temperature", I),
        field("excursion", I),
        field("heartbeat", I),
        field("version", I),
    ],
    repeated: None,
};

static AUDIO_HARDWARE_STATS: Schema = Schema {
    fields: &[
        field("milli_rate_of_ams_per_day", I),
        field("source", I),
        field("cca_active_count_per_day", I),
        field("cca_enable_count_per_day", I),
        field("total_call_count_per_day", I),
    ],
    repeated: None,
};

static AUDIO_PDM_STATS: Schema = Schema {
    fields: &[field("pdm_index", I), field("state", I)],
    repeated: None,
};

static AUDIO_THIRD_PARTY_EFFECT_STATS: Schema = Schema {
    fields: &[
        field("instance", I),
        field("volume_range_0_active_ms_per_day", I),
        field("volume_range_1_active_ms_per_day", I),
        field("volume_range_2_active_ms_per_day", I),
        field("volume_range_3_active_ms_per_day", I),
        field("volume_range_4_active_ms_per_day", I),
        field("volume_range_5_active_ms_per_day", I),
        field("volume_range_6_active_ms_per_day", I),
        field("volume_range_7_active_ms_per_day", I),
        field("volume_range_8_active_ms_per_day", I),
        field("volume_range_9_active_ms_per_day", I),
    ],
    repeated: None,
};

static AUDIO_ADAPTED_INFO_STATS: Schema = Schema {
    fields: &[
        field("feature_id", I),
        field("active_counts_per_day", I),
        field("active_duration_ms_per_day", I),
    ],
    repeated: None,
};

static AUDIO_PCM_STATS: Schema = Schema {
    fields: &[
        field("type", I),
        field("pcm_open_latency_avg_ms_per_day", I),
        field("pcm_active_counts_per_day", I),
    ],
    repeated: None,
};

static AUDIO_OFFLOADED_EFFECT_STATS: Schema = Schema {
    fields: &[
        field("effect_uuid_msb", L),
        field("effect_uuid_lsb", L),
        field("effect_active_seconds_per_day", I),
    ],
    repeated: None,
};

static AUDIO_BT_MEDIA_STATS: Schema = Schema {
    fields: &[field("bt_codec_type", I), field("active_seconds_per_day", I)],
    repeated: None,
};

/// Enum values of the `hardware_failed` atom.
pub mod hardware {
    pub const TYPE_MICROPHONE: i32 = 2;
    pub const TYPE_CODEC: i32 = 3;

    pub const FAILURE_COMPLETE: i32 = 1;
    pub const FAILURE_DEGRADE: i32 = 2;
}

/// Every atom the daemon can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    HardwareFailed,
    UsbPortOverheat,
    PdVidPid,
    ThermalSensorAbnormality,
    ZramMmStat,
    ZramBdStat,
    BatteryCapacity,
    ChargeCycles,
    BlockStats,
    SlowIo,
    SpeakerImpedance,
    SpeechDspStat,
    UfsLifetime,
    UfsResetCount,
    ResumeLatency,
    PartitionUsedSpace,
    F2fsStats,
    F2fsAtomicWriteInfo,
    F2fsCompressionInfo,
    F2fsGcSegmentInfo,
    LongIrqStats,
    PcieLinkStats,
    SpeakerHealth,
    AudioHardwareStats,
    AudioPdmStats,
    AudioThirdPartyEffectStats,
    AudioAdaptedInfoStats,
    AudioPcmStats,
    AudioOffloadedEffectStats,
    AudioBtMediaStats,
}

impl AtomKind {
    /// Returns the stable string label for this atom.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HardwareFailed => "hardware_failed",
            Self::UsbPortOverheat => "usb_port_overheat",
            Self::PdVidPid => "pd_vid_pid",
            Self::ThermalSensorAbnormality => "thermal_sensor_abnormality",
            Self::ZramMmStat => "zram_mm_stat",
            Self::ZramBdStat => "zram_bd_stat",
            Self::BatteryCapacity => "battery_capacity",
            Self::ChargeCycles => "charge_cycles",
            Self::BlockStats => "block_stats",
            Self::SlowIo => "slow_io",
            Self::SpeakerImpedance => "speaker_impedance",
            Self::SpeechDspStat => "speech_dsp_stat",
            Self::UfsLifetime => "ufs_lifetime",
            Self::UfsResetCount => "ufs_reset_count",
            Self::ResumeLatency => "resume_latency",
            Self::PartitionUsedSpace => "partition_used_space",
            Self::F2fsStats => "f2fs_stats",
            Self::F2fsAtomicWriteInfo => "f2fs_atomic_write_info",
            Self::F2fsCompressionInfo => "f2fs_compression_info",
            Self::F2fsGcSegmentInfo => "f2fs_gc_segment_info",
            Self::LongIrqStats => "long_irq_stats",
            Self::PcieLinkStats => "pcie_link_stats",
            Self::SpeakerHealth => "speaker_health",
            Self::AudioHardwareStats => "audio_hardware_stats",
            Self::AudioPdmStats => "audio_pdm_stats",
            Self::AudioThirdPartyEffectStats => "audio_third_party_effect_stats",
            Self::AudioAdaptedInfoStats => "audio_adapted_info_stats",
            Self::AudioPcmStats => "audio_pcm_stats",
            Self::AudioOffloadedEffectStats => "audio_offloaded_effect_stats",
            Self::AudioBtMediaStats => "audio_bt_media_stats",
        }
    }

    pub fn schema(self) -> &'static Schema {
        match self {
            Self::HardwareFailed => &HARDWARE_FAILED,
            Self::UsbPortOverheat => &USB_PORT_OVERHEAT,
            Self::PdVidPid => &PD_VID_PID,
            Self::ThermalSensorAbnormality => &THERMAL_SENSOR_ABNORMALITY,
            Self::ZramMmStat => &ZRAM_MM_STAT,
            Self::ZramBdStat => &ZRAM_BD_STAT,
            Self::BatteryCapacity => &BATTERY_CAPACITY,
            Self::ChargeCycles => &CHARGE_CYCLES,
            Self::BlockStats => &BLOCK_STATS,
            Self::SlowIo => &SLOW_IO,
            Self::SpeakerImpedance => &SPEAKER_IMPEDANCE,
            Self::SpeechDspStat => &SPEECH_DSP_STAT,
            Self::UfsLifetime => &UFS_LIFETIME,
            Self::UfsResetCount => &UFS_RESET_COUNT,
            Self::ResumeLatency => &RESUME_LATENCY,
            Self::PartitionUsedSpace => &PARTITION_USED_SPACE,
            Self::F2fsStats => &F2FS_STATS,
            Self::F2fsAtomicWriteInfo => &F2FS_ATOMIC_WRITE_INFO,
            Self::F2fsCompressionInfo => &F2FS_COMPRESSION_INFO,
            Self::F2fsGcSegmentInfo => &F2FS_GC_SEGMENT_INFO,
            Self::LongIrqStats => &LONG_IRQ_STATS,
            Self::PcieLinkStats => &PCIE_LINK_STATS,
            Self::SpeakerHealth => &SPEAKER_HEALTH,
            Self::AudioHardwareStats => &AUDIO_HARDWARE_STATS,
            Self::AudioPdmStats => &AUDIO_PDM_STATS,
            Self::AudioThirdPartyEffectStats => &AUDIO_THIRD_PARTY_EFFECT_STATS,
            Self::AudioAdaptedInfoStats => &AUDIO_ADAPTED_INFO_STATS,
            Self::AudioPcmStats => &AUDIO_PCM_STATS,
            Self::AudioOffloadedEffectStats => &AUDIO_OFFLOADED_EFFECT_STATS,
            Self::AudioBtMediaStats => &AUDIO_BT_MEDIA_STATS,
        }
    }

    /// Starts building an atom of this kind.
    pub fn builder(self) -> AtomBuilder {
        AtomBuilder::new(self)
    }
}

impl fmt::Display for AtomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema violations detected while building an atom.
#[derive(Error, Debug, PartialEq)]
pub enum AtomError {
    #[error("{atom}: missing field {field}")]
    MissingField {
        atom: &'static str,
        field: &'static str,
    },

    #[error("{atom}: field {field} set twice")]
    DuplicateField {
        atom: &'static str,
        field: &'static str,
    },

    #[error("{atom}: unknown field {field}")]
    UnknownField {
        atom: &'static str,
        field: &'static str,
    },

    #[error("{atom}: field {field} expects {expected}, got {found}")]
    TypeMismatch {
        atom: &'static str,
        field: &'static str,
        expected: ValueType,
        found: ValueType,
    },
}

/// A complete, schema-ordered telemetry record.
#[derive(Debug, Clone, PartialEq)]
pub struct Atom {
    kind: AtomKind,
    values: Vec<AtomValue>,
}

impl Atom {
    pub fn kind(&self) -> AtomKind {
        self.kind
    }

    /// Values in schema order.
    pub fn values(&self) -> &[AtomValue] {
        &self.values
    }

    /// Iterates `(field name, value)` pairs in schema order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static str, &AtomValue)> + '_ {
        let schema = self.kind.schema();
        let repeated = schema.repeated.map(|f| f.name).unwrap_or("");
        self.values.iter().enumerate().map(move |(i, v)| {
            let name = schema.fields.get(i).map(|f| f.name).unwrap_or(repeated);
            (name, v)
        })
    }

    /// First value of the field called `name`.
    pub fn get(&self, name: &str) -> Option<&AtomValue> {
        self.fields().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Values of the repeated tail, if the schema has one.
    pub fn repeated(&self) -> &[AtomValue] {
        let fixed = self.kind.schema().fields.len();
        self.values.get(fixed..).unwrap_or(&[])
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.kind)?;
        for (i, (name, value)) in self.fields().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("}")
    }
}

/// Collects named fields and resolves them into an [`Atom`].
#[derive(Debug, Clone)]
pub struct AtomBuilder {
    kind: AtomKind,
    named: Vec<(&'static str, AtomValue)>,
    repeated: Vec<AtomValue>,
}

impl AtomBuilder {
    pub fn new(kind: AtomKind) -> Self {
        Self {
            kind,
            named: Vec::new(),
            repeated: Vec::new(),
        }
    }

    pub fn int(self, name: &'static str, value: i32) -> Self {
        self.set(name, AtomValue::Int(value))
    }

    pub fn long(self, name: &'static str, value: i64) -> Self {
        self.set(name, AtomValue::Long(value))
    }

    pub fn float(self, name: &'static str, value: f32) -> Self {
        self.set(name, AtomValue::Float(value))
    }

    pub fn string(self, name: &'static str, value: impl Into<String>) -> Self {
        self.set(name, AtomValue::String(value.into()))
    }

    /// Sets a fixed field by name.
    pub fn set(mut self, name: &'static str, value: AtomValue) -> Self {
        self.named.push((name, value));
        self
    }

    /// Appends to the repeated tail.
    pub fn push(mut self, value: AtomValue) -> Self {
        self.repeated.push(value);
        self
    }

    /// Appends every value to the repeated tail.
    pub fn extend(mut self, values: impl IntoIterator<Item = AtomValue>) -> Self {
        self.repeated.extend(values);
        self
    }

    /// Orders the collected fields by schema and checks their types.
    pub fn build(self) -> Result<Atom, AtomError> {
        let atom = self.kind.as_str();
        let schema = self.kind.schema();

        for (i, (name, _)) in self.named.iter().enumerate() {
            if !schema.fields.iter().any(|f| f.name == *name) {
                return Err(AtomError::UnknownField { atom, field: name });
            }
            if self.named[..i].iter().any(|(n, _)| n == name) {
                return Err(AtomError::DuplicateField { atom, field: name });
            }
        }

        let mut values = Vec::with_capacity(schema.fields.len() + self.repeated.len());
        let mut named = self.named;
        for spec in schema.fields {
            let pos = named
                .iter()
                .position(|(n, _)| *n == spec.name)
                .ok_or(AtomError::MissingField {
                    atom,
                    field: spec.name,
                })?;
            let (_, value) = named.swap_remove(pos);
            check_type(atom, spec, &value)?;
            values.push(value);
        }

        if !self.repeated.is_empty() {
            let Some(spec) = schema.repeated else {
                return Err(AtomError::UnknownField {
                    atom,
                    field: "<repeated>",
                });
            };
            for value in &self.repeated {
                check_type(atom, &spec, value)?;
            }
            values.extend(self.repeated);
        }

        Ok(Atom {
            kind: self.kind,
            values,
        })
    }
}

fn check_type(atom: &'static str, spec: &FieldSpec, value: &AtomValue) -> Result<(), AtomError> {
    let found = value.value_type();
    if found != spec.ty {
        return Err(AtomError::TypeMismatch {
            atom,
            field: spec.name,
            expected: spec.ty,
            found,
        });
    }
    Ok(())
}
