pub mod timer;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::export::health::HealthMetrics;

pub use timer::TimerFd;

/// Named reporting period driven by the base tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    FiveMinute,
    Hourly,
    Daily,
}

impl Cadence {
    /// All cadences in firing order.
    pub const ALL: [Cadence; 3] = [Cadence::FiveMinute, Cadence::Hourly, Cadence::Daily];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::FiveMinute => "five_minute",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }
}

impl std::fmt::Display for Cadence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work registered against a cadence.
pub type CadenceCallback = Box<dyn FnMut() + Send>;

/// Errors that end the scheduler loop.
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("tick interval must be positive")]
    ZeroTick,

    #[error("{cadence} period {period:?} is not a positive multiple of the {tick:?} tick")]
    InvalidPeriod {
        cadence: Cadence,
        period: Duration,
        tick: Duration,
    },

    #[error("{cadence} threshold must be positive")]
    ZeroThreshold { cadence: Cadence },

    #[error("{cadence} registered twice")]
    DuplicateCadence { cadence: Cadence },

    #[error("creating timer: {0}")]
    TimerCreate(#[source] std::io::Error),

    #[error("arming timer: {0}")]
    TimerArm(#[source] std::io::Error),

    #[error("reading timer: {0}")]
    TimerRead(#[source] std::io::Error),

    #[error("short timer read: {0} bytes")]
    ShortRead(usize),
}

/// Blocking source of elapsed base ticks.
pub trait TickSource {
    /// Blocks until at least one tick elapsed and returns how many.
    /// `Ok(None)` means the source is closed.
    fn wait(&mut self) -> Result<Option<u64>, ScheduleError>;
}

struct CadenceSlot {
    cadence: Cadence,
    threshold: u64,
    counter: u64,
    callbacks: Vec<CadenceCallback>,
}

/// Derives several cadences from one periodic tick.
///
/// Each cadence keeps a counter of ticks since it last fired. A cadence
/// whose counter reached its threshold fires once and keeps the remainder,
/// so late wake-ups carry forward instead of being lost. Missed periods are
/// never replayed.
pub struct CadenceScheduler {
    slots: Vec<CadenceSlot>,
    health: Option<Arc<HealthMetrics>>,
}

impl std::fmt::Debug for CadenceScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("CadenceScheduler");
        for slot in &self.slots {
            d.field(slot.cadence.as_str(), &(slot.counter, slot.threshold));
        }
        d.finish()
    }
}

impl CadenceScheduler {
    /// Creates a scheduler from thresholds expressed in ticks.
    pub fn new(
        thresholds: impl IntoIterator<Item = (Cadence, u64)>,
    ) -> Result<Self, ScheduleError> {
        let mut slots: Vec<CadenceSlot> = Vec::with_capacity(Cadence::ALL.len());

        for (cadence, threshold) in thresholds {
            if threshold == 0 {
                return Err(ScheduleError::ZeroThreshold { cadence });
            }
            if slots.iter().any(|s| s.cadence == cadence) {
                return Err(ScheduleError::DuplicateCadence { cadence });
            }
            slots.push(CadenceSlot {
                cadence,
                threshold,
                counter: 0,
                callbacks: Vec::new(),
            });
        }

        slots.sort_by_key(|s| s.cadence);

        Ok(Self {
            slots,
            health: None,
        })
    }

    /// Creates a scheduler from wall-clock periods that must divide evenly
    /// by `tick`.
    pub fn from_periods(
        tick: Duration,
        periods: impl IntoIterator<Item = (Cadence, Duration)>,
    ) -> Result<Self, ScheduleError> {
        if tick.is_zero() {
            return Err(ScheduleError::ZeroTick);
        }

        let tick_nanos = tick.as_nanos();
        let mut thresholds = Vec::new();
        for (cadence, period) in periods {
            let nanos = period.as_nanos();
            if nanos == 0 || nanos % tick_nanos != 0 {
                return Err(ScheduleError::InvalidPeriod {
                    cadence,
                    period,
                    tick,
                });
            }
            let threshold = u64::try_from(nanos / tick_nanos).map_err(|_| {
                ScheduleError::InvalidPeriod {
                    cadence,
                    period,
                    tick,
                }
            })?;
            thresholds.push((cadence, threshold));
        }

        Self::new(thresholds)
    }

    pub fn with_metrics(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Registers a callback for `cadence`. Unknown cadences are ignored
    /// with a warning.
    pub fn on(&mut self, cadence: Cadence, callback: CadenceCallback) {
        match self.slots.iter_mut().find(|s| s.cadence == cadence) {
            Some(slot) => slot.callbacks.push(callback),
            None => warn!(cadence = %cadence, "callback for unscheduled cadence dropped"),
        }
    }

    pub fn threshold(&self, cadence: Cadence) -> Option<u64> {
        self.slot(cadence).map(|s| s.threshold)
    }

    pub fn counter(&self, cadence: Cadence) -> Option<u64> {
        self.slot(cadence).map(|s| s.counter)
    }

    fn slot(&self, cadence: Cadence) -> Option<&CadenceSlot> {
        self.slots.iter().find(|s| s.cadence == cadence)
    }

    /// Runs every cadence once, in cadence order, without touching counters.
    pub fn run_startup(&mut self) {
        info!("running initial observations");

        for slot in &mut self.slots {
            fire(slot, self.health.as_deref());
        }
    }

    /// Accounts for `elapsed` ticks and fires every cadence that is due.
    /// Returns the cadences that fired.
    pub fn advance(&mut self, elapsed: u64) -> Vec<Cadence> {
        let mut fired = Vec::new();
        if elapsed == 0 {
            return fired;
        }

        if let Some(health) = &self.health {
            health.scheduler_ticks.inc_by(elapsed as f64);
        }

        for slot in &mut self.slots {
            slot.counter = slot.counter.saturating_add(elapsed);
        }

        for slot in &mut self.slots {
            if slot.counter < slot.threshold {
                continue;
            }

            if slot.counter >= slot.threshold.saturating_mul(2) {
                warn!(
                    cadence = %slot.cadence,
                    counter = slot.counter,
                    threshold = slot.threshold,
                    "cadence overshot by more than one period",
                );
                if let Some(health) = &self.health {
                    health
                        .cadence_overshoots
                        .with_label_values(&[slot.cadence.as_str()])
                        .inc();
                }
            }

            fire(slot, self.health.as_deref());
            slot.counter %= slot.threshold;
            fired.push(slot.cadence);
        }

        fired
    }

    /// Drives the scheduler from `source` until it closes or fails.
    pub fn run<T: TickSource>(&mut self, source: &mut T) -> Result<(), ScheduleError> {
        loop {
            let Some(elapsed) = source.wait()? else {
                debug!("tick source closed");
                return Ok(());
            };

            if elapsed > 1 {
                debug!(elapsed, "multiple ticks elapsed since last wake");
            }

            self.advance(elapsed);
        }
    }
}

fn fire(slot: &mut CadenceSlot, health: Option<&HealthMetrics>) {
    debug!(
        cadence = %slot.cadence,
        callbacks = slot.callbacks.len(),
        "cadence fired",
    );

    if let Some(health) = health {
        health
            .cadence_fires
            .with_label_values(&[slot.cadence.as_str()])
            .inc();
    }

    for callback in &mut slot.callbacks {
        callback();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;

    fn counting(sched: &mut CadenceScheduler, cadence: Cadence) -> Arc<AtomicU64> {
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        sched.on(
            cadence,
            Box::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            }),
        );
        count
    }

    fn standard() -> CadenceScheduler {
        CadenceScheduler::new([
            (Cadence::FiveMinute, 1),
            (Cadence::Hourly, 12),
            (Cadence::Daily, 288),
        ])
        .unwrap()
    }

    struct Scripted(std::vec::IntoIter<u64>);

    impl TickSource for Scripted {
        fn wait(&mut self) -> Result<Option<u64>, ScheduleError> {
            Ok(self.0.next())
        }
    }

    struct Broken;

    impl TickSource for Broken {
        fn wait(&mut self) -> Result<Option<u64>, ScheduleError> {
            Err(ScheduleError::ShortRead(3))
        }
    }

    #[test]
    fn test_from_periods_thresholds() {
        let sched = CadenceScheduler::from_periods(
            Duration::from_secs(300),
            [
                (Cadence::Daily, Duration::from_secs(86_400)),
                (Cadence::FiveMinute, Duration::from_secs(300)),
                (Cadence::Hourly, Duration::from_secs(3600)),
            ],
        )
        .unwrap();

        assert_eq!(sched.threshold(Cadence::FiveMinute), Some(1));
        assert_eq!(sched.threshold(Cadence::Hourly), Some(12));
        assert_eq!(sched.threshold(Cadence::Daily), Some(288));
    }

    #[test]
    fn test_from_periods_rejects_fractional() {
        let err = CadenceScheduler::from_periods(
            Duration::from_secs(300),
            [(Cadence::Hourly, Duration::from_secs(3500))],
        )
        .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidPeriod { .. }));

        let err = CadenceScheduler::from_periods(Duration::ZERO, []).unwrap_err();
        assert!(matches!(err, ScheduleError::ZeroTick));
    }

    #[test]
    fn test_new_rejects_zero_and_duplicates() {
        assert!(matches!(
            CadenceScheduler::new([(Cadence::Hourly, 0)]).unwrap_err(),
            ScheduleError::ZeroThreshold { .. }
        ));
        assert!(matches!(
            CadenceScheduler::new([(Cadence::Hourly, 12), (Cadence::Hourly, 6)]).unwrap_err(),
            ScheduleError::DuplicateCadence { .. }
        ));
    }

    #[test]
    fn test_hourly_fires_on_twelfth_tick_with_double_wake() {
        let mut sched = standard();
        let hourly = counting(&mut sched, Cadence::Hourly);

        for _ in 0..10 {
            sched.advance(1);
        }
        assert_eq!(hourly.load(Ordering::Relaxed), 0);

        // 10 + 2 = 12 accumulated ticks.
        let fired = sched.advance(2);
        assert!(fired.contains(&Cadence::Hourly));
        assert_eq!(hourly.load(Ordering::Relaxed), 1);
        assert_eq!(sched.counter(Cadence::Hourly), Some(0));
    }

    #[test]
    fn test_eleven_single_then_double_keeps_overshoot() {
        let mut sched = standard();
        let hourly = counting(&mut sched, Cadence::Hourly);

        for _ in 0..11 {
            sched.advance(1);
        }
        sched.advance(2);
        assert_eq!(hourly.load(Ordering::Relaxed), 1);
        assert_eq!(sched.counter(Cadence::Hourly), Some(1));
    }

    #[test]
    fn test_fire_count_matches_floor_division() {
        let waves: [u64; 9] = [1, 3, 7, 1, 1, 12, 25, 2, 300];
        let mut sched = standard();
        let hourly = counting(&mut sched, Cadence::Hourly);
        let daily = counting(&mut sched, Cadence::Daily);
        let five = counting(&mut sched, Cadence::FiveMinute);

        let mut total = 0u64;
        let mut expected_hourly = 0u64;
        let mut expected_daily = 0u64;
        for w in waves {
            let before_h = total % 12;
            let before_d = total % 288;
            total += w;
            sched.advance(w);
            // At most one fire per check, never a replay.
            if before_h + w >= 12 {
                expected_hourly += 1;
            }
            if before_d + w >= 288 {
                expected_daily += 1;
            }
        }

        assert_eq!(five.load(Ordering::Relaxed), waves.len() as u64);
        assert_eq!(hourly.load(Ordering::Relaxed), expected_hourly);
        assert_eq!(daily.load(Ordering::Relaxed), expected_daily);
        assert_eq!(sched.counter(Cadence::FiveMinute), Some(0));
    }

    #[test]
    fn test_single_tick_wakes_fire_floor_times() {
        let mut sched = standard();
        let hourly = counting(&mut sched, Cadence::Hourly);
        let daily = counting(&mut sched, Cadence::Daily);

        for _ in 0..600 {
            sched.advance(1);
        }

        assert_eq!(hourly.load(Ordering::Relaxed), 600 / 12);
        assert_eq!(daily.load(Ordering::Relaxed), 600 / 288);
        assert_eq!(sched.counter(Cadence::Hourly), Some(600 % 12));
        assert_eq!(sched.counter(Cadence::Daily), Some(600 % 288));
    }

    #[test]
    fn test_overshoot_fires_once_and_counts() {
        let health = Arc::new(HealthMetrics::new("").unwrap());
        let mut sched = standard().with_metrics(Arc::clone(&health));
        let hourly = counting(&mut sched, Cadence::Hourly);

        sched.advance(30);
        assert_eq!(hourly.load(Ordering::Relaxed), 1);
        assert_eq!(sched.counter(Cadence::Hourly), Some(6));
        assert_eq!(
            health
                .cadence_overshoots
                .with_label_values(&["hourly"])
                .get() as u64,
            1
        );
        // Daily has not overshot its own threshold.
        assert_eq!(
            health
                .cadence_overshoots
                .with_label_values(&["daily"])
                .get() as u64,
            0
        );
        assert_eq!(health.scheduler_ticks.get() as u64, 30);
    }

    #[test]
    fn test_zero_elapsed_is_noop() {
        let mut sched = standard();
        let five = counting(&mut sched, Cadence::FiveMinute);
        assert!(sched.advance(0).is_empty());
        assert_eq!(five.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_run_startup_fires_everything_in_order() {
        let mut sched = standard();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for cadence in [Cadence::Daily, Cadence::FiveMinute, Cadence::Hourly] {
            let order = Arc::clone(&order);
            sched.on(cadence, Box::new(move || order.lock().push(cadence)));
        }

        sched.run_startup();

        assert_eq!(*order.lock(), Cadence::ALL.to_vec());
        assert_eq!(sched.counter(Cadence::Hourly), Some(0));
    }

    #[test]
    fn test_run_until_source_closes() {
        let mut sched = standard();
        let hourly = counting(&mut sched, Cadence::Hourly);
        let mut source = Scripted(vec![6, 6, 6, 6].into_iter());

        sched.run(&mut source).unwrap();
        assert_eq!(hourly.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_run_propagates_timer_failure() {
        let mut sched = standard();
        let err = sched.run(&mut Broken).unwrap_err();
        assert!(err.to_string().contains("short timer read"));
    }

    #[test]
    fn test_cadence_deserialize() {
        let c: Cadence = serde_yaml::from_str("five_minute").unwrap();
        assert_eq!(c, Cadence::FiveMinute);
        assert_eq!(Cadence::Daily.to_string(), "daily");
    }
}
