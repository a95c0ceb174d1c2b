use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collector::build_collectors;
use crate::config::Config;
use crate::export::health::HealthMetrics;
use crate::scheduler::{CadenceScheduler, TimerFd};
use crate::sink::http::HttpSink;
use crate::sink::log::LogSink;
use crate::sink::{Reporter, Sink};
use crate::uevent::handlers::register_all;
use crate::uevent::{EventDispatcher, NetlinkUeventSocket, UeventListener};

/// Agent wires the uevent listener, the cadence scheduler and the sinks
/// together and reports fatal failures of the blocking loops.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    reporter: Option<Arc<Reporter>>,
    http_sink: Option<Arc<HttpSink>>,
    fatal_tx: mpsc::Sender<anyhow::Error>,
    fatal_rx: mpsc::Receiver<anyhow::Error>,
    threads: Vec<thread::JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);
        let (fatal_tx, fatal_rx) = mpsc::channel(4);

        Ok(Self {
            cfg,
            health,
            reporter: None,
            http_sink: None,
            fatal_tx,
            fatal_rx,
            threads: Vec::with_capacity(2),
            cancel: CancellationToken::new(),
        })
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    /// Reporter shared by every producer, available after `start`.
    pub fn reporter(&self) -> Option<&Arc<Reporter>> {
        self.reporter.as_ref()
    }

    /// Start all components.
    pub async fn start(&mut self) -> Result<()> {
        // 0. Health server first so probes respond during startup.
        if self.cfg.health.enabled {
            Arc::clone(&self.health)
                .start()
                .await
                .context("starting health metrics server")?;
        }

        // 1. Sinks.
        let reporter = Arc::new(self.build_reporter()?);
        info!(sinks = ?reporter.sink_names(), "reporter ready");
        self.reporter = Some(Arc::clone(&reporter));

        // 2. Uevent listener.
        if self.cfg.uevent.enabled {
            self.spawn_uevent_listener(Arc::clone(&reporter))?;
        } else {
            info!("uevent listener disabled");
        }

        // 3. Cadence scheduler.
        self.spawn_scheduler(reporter)?;

        info!("agent started");

        Ok(())
    }

    fn build_reporter(&mut self) -> Result<Reporter> {
        let mut reporter = Reporter::new(Arc::clone(&self.health));

        if self.cfg.sinks.log.enabled {
            reporter.add_sink(Arc::new(LogSink::new()));
        }

        if self.cfg.sinks.http.enabled {
            let sink = Arc::new(HttpSink::new(self.cfg.sinks.http.clone()));
            sink.start(self.cancel.child_token())
                .context("starting HTTP sink")?;
            reporter.add_sink(Arc::clone(&sink) as Arc<dyn Sink>);
            self.http_sink = Some(sink);
        }

        if reporter.sink_names().is_empty() {
            warn!("no sinks enabled, atoms will only be counted");
        }

        Ok(reporter)
    }

    fn spawn_uevent_listener(&mut self, reporter: Arc<Reporter>) -> Result<()> {
        let ucfg = &self.cfg.uevent;

        let socket = NetlinkUeventSocket::open(ucfg.receive_buffer_size)
            .context("opening uevent socket")?;

        let mut dispatcher = EventDispatcher::new().with_metrics(Arc::clone(&self.health));
        register_all(&mut dispatcher, ucfg, reporter);

        let mut listener = UeventListener::new(
            socket,
            dispatcher,
            ucfg.max_consecutive_errors,
            Arc::clone(&self.health),
        );
        let fatal_tx = self.fatal_tx.clone();

        let handle = thread::Builder::new()
            .name("uevent".to_string())
            .spawn(move || {
                let exhausted = listener.listen();
                error!(error = %exhausted, "uevent listener stopped");
                let _ = fatal_tx.blocking_send(anyhow!(exhausted));
            })
            .context("spawning uevent thread")?;

        self.threads.push(handle);

        Ok(())
    }

    fn spawn_scheduler(&mut self, reporter: Arc<Reporter>) -> Result<()> {
        let scfg = &self.cfg.scheduler;
        let tick = scfg.tick_interval;
        let startup_delay = scfg.startup_delay;

        let mut scheduler = CadenceScheduler::from_periods(tick, scfg.cadences.as_list())
            .context("building cadence scheduler")?
            .with_metrics(Arc::clone(&self.health));

        for (cadence, mut set) in build_collectors(&self.cfg.collectors) {
            if set.is_empty() {
                continue;
            }
            let reporter = Arc::clone(&reporter);
            scheduler.on(cadence, Box::new(move || set.run_all(&reporter)));
        }

        let fatal_tx = self.fatal_tx.clone();

        let handle = thread::Builder::new()
            .name("scheduler".to_string())
            .spawn(move || {
                if !startup_delay.is_zero() {
                    info!(delay = ?startup_delay, "waiting before first observation");
                    thread::sleep(startup_delay);
                }

                scheduler.run_startup();

                let result = TimerFd::new(tick).and_then(|mut timer| {
                    info!(tick = ?tick, "cadence timer armed");
                    scheduler.run(&mut timer)
                });

                let err = match result {
                    Ok(()) => anyhow!("cadence timer closed"),
                    Err(e) => anyhow!(e).context("cadence scheduler failed"),
                };
                error!(error = %err, "scheduler stopped");
                let _ = fatal_tx.blocking_send(err);
            })
            .context("spawning scheduler thread")?;

        self.threads.push(handle);

        Ok(())
    }

    /// Waits until a blocking loop fails and returns its error.
    pub async fn wait_fatal(&mut self) -> anyhow::Error {
        match self.fatal_rx.recv().await {
            Some(err) => err,
            None => anyhow!("fatal channel closed"),
        }
    }

    /// Stop async components. The blocking threads are left to exit with
    /// the process.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(sink) = self.http_sink.take() {
            sink.stop();
        }

        self.health.stop();

        let finished = self.threads.iter().filter(|t| t.is_finished()).count();
        info!(
            threads = self.threads.len(),
            finished, "agent stopped",
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let yaml = format!(
            r#"
scheduler:
  tick_interval: 1s
  startup_delay: 0s
  cadences:
    five_minute: 1s
    hourly: 2s
    daily: 4s
uevent:
  enabled: false
collectors:
  block_stat: {dir}/stat
  partition_used_space: ~
  ufs_err_stats:
    - {dir}/err0
sinks:
  log:
    enabled: false
"#,
            dir = dir.display()
        );
        Config::from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_agent_runs_startup_observations() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stat"), "1 0 2 3 4 0 5 6 0 0 0").unwrap();
        fs::write(dir.path().join("err0"), "2").unwrap();

        let mut agent = Agent::new(test_config(dir.path())).unwrap();
        agent.start().await.unwrap();
        assert!(agent.reporter().is_some());

        // Startup runs every cadence once on the scheduler thread.
        let health = Arc::clone(agent.health());
        let mut reported = 0;
        for _ in 0..100 {
            reported = health
                .atoms_reported
                .with_label_values(&["block_stats"])
                .get() as u64;
            if reported > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(reported >= 1);

        agent.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_agent_rejects_misaligned_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(dir.path());
        cfg.scheduler.cadences.hourly = Duration::from_millis(1500);

        let mut agent = Agent::new(cfg).unwrap();
        let err = agent.start().await.unwrap_err();
        assert!(format!("{err:#}").contains("not a positive multiple"));
    }
}
