//! Domain handlers for kernel uevents.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use crate::atom::hardware::{FAILURE_COMPLETE, FAILURE_DEGRADE, TYPE_MICROPHONE};
use crate::atom::AtomKind;
use crate::collector::{as_int, sysfs, CollectError};
use crate::config::UeventConfig;
use crate::sink::Reporter;

use super::dispatch::{EventDispatcher, HandlerError, UeventHandler, ValueMatch};
use super::parse::KeyValueRecord;

pub const OVERHEAT_DRIVER: &str = "google,overheat_mitigation";
pub const THERMAL_DEVPATH_PREFIX: &str = "/module/pixel_metrics";

/// Registers every handler that `cfg` enables.
pub fn register_all(dispatcher: &mut EventDispatcher, cfg: &UeventConfig, reporter: Arc<Reporter>) {
    if let Some(devpath) = &cfg.audio_uevent {
        dispatcher.register(
            "DEVPATH",
            ValueMatch::Exact(devpath.clone()),
            Arc::new(MicStatusHandler::new(Arc::clone(&reporter))),
        );
    }

    dispatcher.register(
        "DRIVER",
        ValueMatch::Exact(OVERHEAT_DRIVER.to_string()),
        Arc::new(UsbPortOverheatHandler::new(
            cfg.overheat_path.clone(),
            Arc::clone(&reporter),
        )),
    );

    // The configured value matches as a prefix of the uevent token.
    if let Some((key, value)) = cfg.typec_partner_match() {
        dispatcher.register(
            key,
            ValueMatch::Prefix(value.to_string()),
            Arc::new(TypeCPartnerHandler::new(
                cfg.typec_partner_vid_path.clone(),
                cfg.typec_partner_pid_path.clone(),
                Arc::clone(&reporter),
            )),
        );
    }

    dispatcher.register(
        "DEVPATH",
        ValueMatch::Prefix(THERMAL_DEVPATH_PREFIX.to_string()),
        Arc::new(ThermalAbnormalHandler::new(reporter)),
    );

    info!(rules = dispatcher.len(), "uevent handlers registered");
}

// --- Microphone status ---

/// Reports broken or degraded microphones announced by the audio driver.
pub struct MicStatusHandler {
    reporter: Arc<Reporter>,
}

impl MicStatusHandler {
    pub fn new(reporter: Arc<Reporter>) -> Self {
        Self { reporter }
    }
}

/// Decodes a mic status value into microphone locations.
///
/// `true` means microphone 0. Integers 1..=7 are a bitmask of microphones
/// 0..=2. `0` and `false` mean healthy.
pub fn parse_mic_status(field: &'static str, value: &str) -> Result<Vec<i32>, HandlerError> {
    match value {
        "true" => return Ok(vec![0]),
        "false" => return Ok(Vec::new()),
        _ => {}
    }

    match value.trim().parse::<i32>() {
        Ok(0) => Ok(Vec::new()),
        Ok(mask @ 1..=7) => Ok((0..3).filter(|bit| mask & (1 << bit) != 0).collect()),
        _ => Err(HandlerError::InvalidValue {
            field,
            value: value.to_string(),
        }),
    }
}

impl UeventHandler for MicStatusHandler {
    fn name(&self) -> &str {
        "mic_status"
    }

    fn handle(&self, record: &KeyValueRecord<'_>, _devpath: &str) -> Result<(), HandlerError> {
        for (field, failure_code) in [
            ("MIC_BREAK_STATUS", FAILURE_COMPLETE),
            ("MIC_DEGRADE_STATUS", FAILURE_DEGRADE),
        ] {
            let Some(value) = record.get(field) else {
                continue;
            };

            for mic in parse_mic_status(field, value)? {
                self.reporter.build_and_report(
                    AtomKind::HardwareFailed
                        .builder()
                        .int("hardware_type", TYPE_MICROPHONE)
                        .int("hardware_location", mic)
                        .int("failure_code", failure_code),
                )?;
            }
        }
        Ok(())
    }
}

// --- USB port overheat ---

/// Reports the USB port overheat mitigation counters.
pub struct UsbPortOverheatHandler {
    dir: PathBuf,
    reporter: Arc<Reporter>,
}

impl UsbPortOverheatHandler {
    pub fn new(dir: PathBuf, reporter: Arc<Reporter>) -> Self {
        Self { dir, reporter }
    }

    fn read(&self, name: &str) -> Result<i32, CollectError> {
        sysfs::read_int(&self.dir.join(name)).map(as_int)
    }
}

impl UeventHandler for UsbPortOverheatHandler {
    fn name(&self) -> &str {
        "usb_port_overheat"
    }

    fn handle(&self, _record: &KeyValueRecord<'_>, _driver: &str) -> Result<(), HandlerError> {
        // A partial report would carry zeros that look like real readings.
        let plug = self.read("plug_temp")?;
        let max = self.read("max_temp")?;
        let trip = self.read("trip_time")?;
        let hysteresis = self.read("hysteresis_time")?;
        let cleared = self.read("cleared_time")?;

        self.reporter.build_and_report(
            AtomKind::UsbPortOverheat
                .builder()
                .int("plug_temperature_deci_c", plug)
                .int("max_temperature_deci_c", max)
                .int("time_to_overheat_secs", trip)
                .int("time_to_hysteresis_secs", hysteresis)
                .int("time_to_inactive_secs", cleared),
        )?;
        Ok(())
    }
}

// --- Type-C partner ---

const VID_MASK: u64 = 0xffff;
const VID_GOOGLE: u64 = 0x18d1;
const PRODUCT_TYPE_OFFSET: u64 = 23;
const PRODUCT_TYPE_MASK: u64 = 7;
const PRODUCT_TYPE_CHARGER: u64 = 3;
const PID_OFFSET: usize = 2;
const PID_LENGTH: usize = 4;
const PID_P30: u64 = 0x4f05;

/// Reports the VID/PID of Google chargers attached over USB-C.
pub struct TypeCPartnerHandler {
    vid_path: PathBuf,
    pid_path: PathBuf,
    reporter: Arc<Reporter>,
}

impl TypeCPartnerHandler {
    pub fn new(vid_path: PathBuf, pid_path: PathBuf, reporter: Arc<Reporter>) -> Self {
        Self {
            vid_path,
            pid_path,
            reporter,
        }
    }
}

/// Returns `(vid, pid)` when the partner is a Google charger worth reporting.
pub fn partner_ids(id_header: &str, product: &str) -> Option<(u64, u64)> {
    let vid = sysfs::parse_hex(id_header)?;
    let pid_digits: String = product.chars().skip(PID_OFFSET).take(PID_LENGTH).collect();
    let pid = sysfs::parse_hex(&pid_digits)?;

    if vid & VID_MASK != VID_GOOGLE {
        return None;
    }

    // Chargers only, except the one adapter whose product type is unset.
    let product_type = (vid >> PRODUCT_TYPE_OFFSET) & PRODUCT_TYPE_MASK;
    if product_type != PRODUCT_TYPE_CHARGER && pid != PID_P30 {
        return None;
    }

    Some((vid & VID_MASK, pid))
}

impl UeventHandler for TypeCPartnerHandler {
    fn name(&self) -> &str {
        "typec_partner"
    }

    fn handle(&self, _record: &KeyValueRecord<'_>, _value: &str) -> Result<(), HandlerError> {
        let id_header = sysfs::read_to_string(&self.vid_path)?;
        let product = sysfs::read_to_string(&self.pid_path)?;

        if sysfs::parse_hex(&id_header).is_none() {
            return Err(HandlerError::InvalidValue {
                field: "id_header",
                value: id_header.trim().to_string(),
            });
        }

        let Some((vid, pid)) = partner_ids(&id_header, &product) else {
            debug!(id_header = id_header.trim(), product = product.trim(), "partner not reported");
            return Ok(());
        };

        self.reporter.build_and_report(
            AtomKind::PdVidPid
                .builder()
                .int("vid", vid as i32)
                .int("pid", pid as i32),
        )?;
        Ok(())
    }
}

// --- Thermal sensor abnormality ---

/// Longest sensor name accepted in an abnormality report.
pub const THERMAL_NAME_LENGTH: usize = 16;

/// Abnormality kinds and their atom codes.
const THERMAL_ABNORMAL_TYPES: [(&str, i32); 6] = [
    ("UNKNOWN", 0),
    ("SENSOR_STUCK", 1),
    ("EXTREME_HIGH_TEMP", 2),
    ("EXTREME_LOW_TEMP", 3),
    ("HIGH_RISING_SPEED", 4),
    ("TEMP_READ_FAIL", 5),
];

/// Reports thermal sensors flagged as abnormal by the pixel_metrics module.
pub struct ThermalAbnormalHandler {
    reporter: Arc<Reporter>,
}

impl ThermalAbnormalHandler {
    pub fn new(reporter: Arc<Reporter>) -> Self {
        Self { reporter }
    }
}

/// Parses `name:<sensor>,val:<int>`.
pub fn parse_thermal_info(info: &str) -> Result<(&str, i32), HandlerError> {
    let invalid = || HandlerError::InvalidValue {
        field: "THERMAL_ABNORMAL_INFO",
        value: info.to_string(),
    };

    let (name, val) = info.split_once(',').ok_or_else(invalid)?;
    if val.contains(',') {
        return Err(invalid());
    }

    let name = name.strip_prefix("name:").ok_or_else(invalid)?;
    let val = val.strip_prefix("val:").ok_or_else(invalid)?;

    if name.len() > THERMAL_NAME_LENGTH {
        return Err(invalid());
    }

    let val = sysfs::parse_int(val)
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(invalid)?;

    Ok((name, val))
}

impl UeventHandler for ThermalAbnormalHandler {
    fn name(&self) -> &str {
        "thermal_abnormal"
    }

    fn handle(&self, record: &KeyValueRecord<'_>, _devpath: &str) -> Result<(), HandlerError> {
        let kind = record
            .get("THERMAL_ABNORMAL_TYPE")
            .ok_or(HandlerError::MissingField("THERMAL_ABNORMAL_TYPE"))?;
        let info = record
            .get("THERMAL_ABNORMAL_INFO")
            .ok_or(HandlerError::MissingField("THERMAL_ABNORMAL_INFO"))?;

        let code = THERMAL_ABNORMAL_TYPES
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, code)| *code)
            .ok_or_else(|| HandlerError::InvalidValue {
                field: "THERMAL_ABNORMAL_TYPE",
                value: kind.to_string(),
            })?;

        let (sensor, value) = parse_thermal_info(info)?;

        info!(kind, sensor, value, "thermal abnormality detected");

        self.reporter.build_and_report(
            AtomKind::ThermalSensorAbnormality
                .builder()
                .int("type", code)
                .string("sensor", sensor)
                .int("value", value),
        )?;
        Ok(())
    }
}
