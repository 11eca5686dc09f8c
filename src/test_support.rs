//! Log capture shared by unit tests.

use std::sync::{Arc, Mutex};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::Layer;

/// Records every event as `(level, rendered fields)`.
#[derive(Clone, Default)]
pub struct Capture {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

struct Render<'a>(&'a mut String);

impl Visit for Render<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.push_str(&format!("{}={:?} ", field.name(), value));
    }
}

impl<S: Subscriber> Layer<S> for Capture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = String::new();
        event.record(&mut Render(&mut line));
        if let Ok(mut events) = self.events.lock() {
            events.push((*event.metadata().level(), line));
        }
    }
}

impl Capture {
    /// Events at `level` whose rendered fields contain `needle`.
    pub fn count(&self, level: Level, needle: &str) -> usize {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(l, line)| *l == level && line.contains(needle))
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn count_level(&self, level: Level) -> usize {
        self.count(level, "")
    }

    pub fn rendered(&self) -> String {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .map(|(_, line)| line.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }
}

/// Runs `f` with a subscriber that only feeds the returned capture.
pub fn captured<T>(f: impl FnOnce() -> T) -> (T, Capture) {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, capture)
}
