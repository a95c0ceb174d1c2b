use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::atom::AtomKind;
use crate::sink::Reporter;

use super::{as_int, sysfs, CollectError, Collector, Source};

/// One file in a PCIe link statistics directory.
struct LinkStat {
    file: &'static str,
    /// Counters are cleared by writing the value just read back to them.
    counter: bool,
    modem_field: &'static str,
    wifi_field: &'static str,
}

const LINK_STAT_COUNT: usize = 6;

const LINK_STATS: [LinkStat; LINK_STAT_COUNT] = [
    LinkStat {
        file: "link_down_irqs",
        counter: true,
        modem_field: "modem_pcie_linkdowns",
        wifi_field: "wifi_pcie_linkdowns",
    },
    LinkStat {
        file: "complete_timeout_irqs",
        counter: true,
        modem_field: "modem_pcie_completion_timeouts",
        wifi_field: "wifi_pcie_completion_timeouts",
    },
    LinkStat {
        file: "link_up_failures",
        counter: true,
        modem_field: "modem_pcie_linkup_failures",
        wifi_field: "wifi_pcie_linkup_failures",
    },
    LinkStat {
        file: "link_recovery_failures",
        counter: true,
        modem_field: "modem_pcie_link_recovery_failures",
        wifi_field: "wifi_pcie_link_recovery_failures",
    },
    LinkStat {
        file: "pll_lock_average",
        counter: false,
        modem_field: "modem_pcie_pll_lock_avg",
        wifi_field: "wifi_pcie_pll_lock_avg",
    },
    LinkStat {
        file: "link_up_average",
        counter: false,
        modem_field: "modem_pcie_link_up_avg",
        wifi_field: "wifi_pcie_link_up_avg",
    },
];

/// Reads every stat under `dir`. Unreadable files stay `None`.
fn read_endpoint(endpoint: &str, dir: &Path) -> [Option<i64>; LINK_STAT_COUNT] {
    let mut values = [None; LINK_STAT_COUNT];
    for (slot, stat) in values.iter_mut().zip(LINK_STATS.iter()) {
        let path = dir.join(stat.file);
        let value = match sysfs::read_int(&path) {
            Ok(v) => v,
            Err(e) => {
                debug!(endpoint, error = %e, "pcie link stat unavailable");
                continue;
            }
        };
        if stat.counter {
            if let Err(e) = sysfs::write_value(&path, &value.to_string()) {
                warn!(endpoint, error = %e, "failed to clear pcie link counter");
            }
        }
        *slot = Some(value);
    }
    values
}

/// Link-down, timeout and training statistics of the modem and wifi PCIe
/// links, combined into one atom.
pub struct PcieLink {
    modem: Option<PathBuf>,
    wifi: Option<PathBuf>,
}

impl PcieLink {
    pub fn new(modem: Option<PathBuf>, wifi: Option<PathBuf>) -> Self {
        Self { modem, wifi }
    }
}

impl Collector for PcieLink {
    fn name(&self) -> &'static str {
        super::PCIE_LINK
    }

    fn required(&self) -> Vec<Source<'_>> {
        // Either endpoint is enough.
        vec![Source::new(
            "pcie_link_stats",
            self.modem.as_deref().or(self.wifi.as_deref()),
        )]
    }

    fn collect(&mut self, reporter: &Reporter) -> Result<(), CollectError> {
        let none = [None; LINK_STAT_COUNT];
        let modem = self
            .modem
            .as_deref()
            .map_or(none, |dir| read_endpoint("modem", dir));
        let wifi = self
            .wifi
            .as_deref()
            .map_or(none, |dir| read_endpoint("wifi", dir));

        if modem.iter().chain(wifi.iter()).all(Option::is_none) {
            debug!("no pcie link stats to report");
            return Ok(());
        }

        let positive = |v: Option<i64>| as_int(v.filter(|&v| v > 0).unwrap_or(0));
        let mut builder = AtomKind::PcieLinkStats.builder();
        for (i, stat) in LINK_STATS.iter().enumerate() {
            builder = builder
                .int(stat.modem_field, positive(modem[i]))
                .int(stat.wifi_field, positive(wifi[i]));
        }
        reporter.build_and_report(builder)?;
        Ok(())
    }
}
