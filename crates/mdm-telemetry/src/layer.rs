//! `tracing` layer feeding the uploader.
//!
//! The layer is installed once with the process subscriber. It forwards
//! events through a [`CaptureContext`] that an uploader attaches to; the
//! returned [`CaptureGuard`] detaches it again when dropped, so a layer can
//! outlive any number of runtime restarts.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::uploader::TelemetryHandle;

/// Where captured lines go.
#[derive(Debug)]
pub struct CaptureContext {
    target: RwLock<Option<TelemetryHandle>>,
    min_level: Level,
}

impl CaptureContext {
    /// Route captured lines to `handle` until the guard is dropped.
    /// Replaces any earlier attachment.
    pub fn attach(self: &Arc<Self>, handle: TelemetryHandle) -> CaptureGuard {
        *self.target.write() = Some(handle);
        CaptureGuard {
            context: Arc::clone(self),
        }
    }

    /// Whether an uploader is attached.
    pub fn is_attached(&self) -> bool {
        self.target.read().is_some()
    }

    /// Most verbose level captured.
    pub fn min_level(&self) -> Level {
        self.min_level
    }
}

/// Keeps an uploader attached to a [`CaptureContext`].
#[must_use = "capture stops when the guard is dropped"]
#[derive(Debug)]
pub struct CaptureGuard {
    context: Arc<CaptureContext>,
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        *self.context.target.write() = None;
    }
}

/// Layer copying formatted events into the attached uploader.
#[derive(Debug, Clone)]
pub struct CaptureLayer {
    context: Arc<CaptureContext>,
}

impl CaptureLayer {
    /// Capture events at `min_level` and more severe.
    pub fn new(min_level: Level) -> Self {
        Self {
            context: Arc::new(CaptureContext {
                target: RwLock::new(None),
                min_level,
            }),
        }
    }

    /// Context to attach uploaders to.
    pub fn context(&self) -> Arc<CaptureContext> {
        Arc::clone(&self.context)
    }
}

impl Default for CaptureLayer {
    fn default() -> Self {
        Self::new(Level::INFO)
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > self.context.min_level {
            return;
        }
        let Some(handle) = self.context.target.read().clone() else {
            return;
        };
        let mut line = LineVisitor::default();
        event.record(&mut line);
        handle.capture(format!("{} {}: {}{}", meta.level(), meta.target(), line.message, line.fields));
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.fields.push_str(&format!(" {}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message.push_str(&format!("{value:?}"));
        } else {
            self.fields.push_str(&format!(" {}={value:?}", field.name()));
        }
    }
}
