use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::atom::AtomError;
use crate::collector::CollectError;
use crate::export::health::HealthMetrics;

use super::parse::KeyValueRecord;

/// Why a handler could not finish with a uevent.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("invalid {field} value {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error(transparent)]
    Read(#[from] CollectError),

    #[error(transparent)]
    Atom(#[from] AtomError),

    #[error("handler panicked")]
    Panicked,
}

/// Domain logic invoked for uevents that match its rule.
pub trait UeventHandler: Send + Sync {
    fn name(&self) -> &str;

    /// Handles one record. `value` is the value of the rule's key.
    fn handle(&self, record: &KeyValueRecord<'_>, value: &str) -> Result<(), HandlerError>;
}

/// Adapts a closure into a [`UeventHandler`].
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&KeyValueRecord<'_>, &str) -> Result<(), HandlerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> UeventHandler for FnHandler<F>
where
    F: Fn(&KeyValueRecord<'_>, &str) -> Result<(), HandlerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&self, record: &KeyValueRecord<'_>, value: &str) -> Result<(), HandlerError> {
        (self.f)(record, value)
    }
}

/// Value predicate of an interest rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    Any,
    Exact(String),
    Prefix(String),
}

impl ValueMatch {
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(want) => value == want,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
        }
    }
}

struct Rule {
    key: String,
    value: ValueMatch,
    handler: Arc<dyn UeventHandler>,
}

/// Tally of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub matched: usize,
    pub failed: usize,
}

/// Routes parsed uevents to the handlers whose rules match.
///
/// Every matching handler runs, in registration order. Errors and panics are
/// logged per handler and never stop the remaining handlers.
#[derive(Default)]
pub struct EventDispatcher {
    rules: Vec<Rule>,
    health: Option<Arc<HealthMetrics>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("rules", &self.rules.len())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, health: Arc<HealthMetrics>) -> Self {
        self.health = Some(health);
        self
    }

    /// Registers `handler` for records containing `key` whose value matches.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        value: ValueMatch,
        handler: Arc<dyn UeventHandler>,
    ) {
        let key = key.into();
        debug!(key = %key, ?value, handler = handler.name(), "registered uevent rule");
        self.rules.push(Rule {
            key,
            value,
            handler,
        });
    }

    /// Registers a closure handler.
    pub fn register_fn<F>(&mut self, name: &str, key: &str, value: ValueMatch, f: F)
    where
        F: Fn(&KeyValueRecord<'_>, &str) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.register(key, value, Arc::new(FnHandler::new(name, f)));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn dispatch(&self, record: &KeyValueRecord<'_>) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for rule in &self.rules {
            let Some(value) = record.get(&rule.key) else {
                continue;
            };
            if !rule.value.matches(value) {
                continue;
            }

            outcome.matched += 1;

            let handler = &rule.handler;
            let result = catch_unwind(AssertUnwindSafe(|| handler.handle(record, value)))
                .unwrap_or(Err(HandlerError::Panicked));

            if let Err(e) = result {
                outcome.failed += 1;
                warn!(handler = handler.name(), key = %rule.key, error = %e, "uevent handler failed");
                if let Some(health) = &self.health {
                    health
                        .uevent_handler_failures
                        .with_label_values(&[handler.name()])
                        .inc();
                }
            }
        }

        outcome
    }
}
