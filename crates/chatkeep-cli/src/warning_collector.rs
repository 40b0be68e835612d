//! Tallies the WARN and ERROR events of a run by what degraded.
//!
//! Correction rules report a failure with a `rule` field, and stages that
//! blow their time budget report a `stage` field. Everything else only
//! counts towards the totals.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{Layer, layer::Context};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WarningSummary {
    pub warnings: usize,
    pub errors: usize,
    /// Failures per correction rule
    pub degraded_rules: BTreeMap<String, usize>,
    /// Time budget overruns per correction stage
    pub slow_stages: BTreeMap<String, usize>,
}

impl WarningSummary {
    pub fn is_empty(&self) -> bool {
        self.warnings + self.errors == 0
    }

    fn record(&mut self, level: Level, origin: Origin) {
        if level == Level::ERROR {
            self.errors += 1;
        } else {
            self.warnings += 1;
        }
        match origin {
            Origin::Rule(rule) => *self.degraded_rules.entry(rule).or_default() += 1,
            Origin::Stage(stage) => *self.slow_stages.entry(stage).or_default() += 1,
            Origin::Other => {}
        }
    }
}

/// What an event says degraded. A `rule` field wins over `stage`.
#[derive(Default)]
enum Origin {
    Rule(String),
    Stage(String),
    #[default]
    Other,
}

impl Visit for Origin {
    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "rule" => *self = Origin::Rule(value.to_string()),
            "stage" if !matches!(self, Origin::Rule(_)) => *self = Origin::Stage(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if matches!(field.name(), "rule" | "stage") {
            self.record_str(field, &format!("{value:?}"));
        }
    }
}

/// Layer counting WARN and ERROR events into a shared `WarningSummary`.
/// Clone it before installing to keep a handle for reading the totals.
#[derive(Clone, Default)]
pub struct WarningCollectorLayer {
    summary: Arc<Mutex<WarningSummary>>,
}

impl WarningCollectorLayer {
    pub fn summary(&self) -> WarningSummary {
        self.summary.lock().clone()
    }
}

impl<S: Subscriber> Layer<S> for WarningCollectorLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if !matches!(level, Level::WARN | Level::ERROR) {
            return;
        }
        let mut origin = Origin::default();
        event.record(&mut origin);
        self.summary.lock().record(level, origin);
    }
}
