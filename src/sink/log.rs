use crate::atom::Atom;

use super::{Sink, SinkError};

/// Writes every atom to the tracing log at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn report(&self, atom: &Atom) -> Result<(), SinkError> {
        tracing::info!(
            target: "pixelstatsd::atom",
            atom = atom.kind().as_str(),
            fields = atom.values().len(),
            "{atom}",
        );
        Ok(())
    }
}
