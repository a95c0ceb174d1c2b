pub mod http;
pub mod log;

use std::sync::Arc;

use thiserror::Error;

use crate::atom::{Atom, AtomBuilder, AtomError};
use crate::export::health::HealthMetrics;

/// Reasons a sink can refuse an atom.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{sink} queue full")]
    QueueFull { sink: &'static str },

    #[error("{sink} not started")]
    NotStarted { sink: &'static str },
}

/// Sink accepts finished atoms for delivery.
///
/// `report` is called from the uevent and scheduler threads and must not
/// block; sinks that do I/O hand the atom off to their own workers.
pub trait Sink: Send + Sync {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Accepts one atom. Delivery is best-effort.
    fn report(&self, atom: &Atom) -> Result<(), SinkError>;
}

/// Fans atoms out to every configured sink.
///
/// Failures are logged and counted, never retried and never returned to the
/// producer.
pub struct Reporter {
    sinks: Vec<Arc<dyn Sink>>,
    health: Arc<HealthMetrics>,
}

impl Reporter {
    pub fn new(health: Arc<HealthMetrics>) -> Self {
        Self {
            sinks: Vec::new(),
            health,
        }
    }

    /// Adds a sink. Call before the reporter is shared.
    pub fn add_sink(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn health(&self) -> &Arc<HealthMetrics> {
        &self.health
    }

    /// Hands `atom` to every sink.
    pub fn report(&self, atom: Atom) {
        self.health
            .atoms_reported
            .with_label_values(&[atom.kind().as_str()])
            .inc();

        for sink in &self.sinks {
            if let Err(e) = sink.report(&atom) {
                self.health
                    .sink_failures
                    .with_label_values(&[sink.name()])
                    .inc();
                tracing::warn!(
                    sink = sink.name(),
                    atom = atom.kind().as_str(),
                    error = %e,
                    "reporting atom failed",
                );
            }
        }
    }

    /// Builds and reports an atom, surfacing schema errors to the caller.
    pub fn build_and_report(&self, builder: AtomBuilder) -> Result<(), AtomError> {
        let atom = builder.build()?;
        self.report(atom);
        Ok(())
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("sinks", &self.sink_names())
            .finish()
    }
}

/// In-memory sink that records every atom, used by tests.
#[derive(Default)]
pub struct CaptureSink {
    atoms: parking_lot::Mutex<Vec<Atom>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears everything captured so far.
    pub fn take(&self) -> Vec<Atom> {
        std::mem::take(&mut *self.atoms.lock())
    }

    pub fn len(&self) -> usize {
        self.atoms.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.lock().is_empty()
    }
}

impl Sink for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn report(&self, atom: &Atom) -> Result<(), SinkError> {
        self.atoms.lock().push(atom.clone());
        Ok(())
    }
}
