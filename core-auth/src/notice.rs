//! Debounced user-facing notices.
//!
//! A burst of failing requests (every call on a screen hitting a 503, say)
//! must surface one interruption, not one per request. Each notice kind owns a
//! [`DismissOnceFlag`]; the first trigger inside a cool-down window shows the
//! notice and later triggers are swallowed until the window elapses.

use bridge_traits::Clock;
use chrono::{DateTime, Utc};
use core_runtime::config::NoticeCooldowns;
use core_runtime::events::{CoreEvent, EventBus, NoticeEvent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Show-once latch with a cool-down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DismissOnceFlag {
    cooldown: Duration,
    reset_at: Option<DateTime<Utc>>,
}

impl DismissOnceFlag {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            reset_at: None,
        }
    }

    /// True if the notice should be shown now. Arms the cool-down when it is.
    pub fn trigger(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_shown(now) {
            return false;
        }
        let cooldown = chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::zero());
        self.reset_at = Some(now + cooldown);
        true
    }

    pub fn is_shown(&self, now: DateTime<Utc>) -> bool {
        matches!(self.reset_at, Some(reset_at) if now < reset_at)
    }

    pub fn reset(&mut self) {
        self.reset_at = None;
    }
}

/// One [`DismissOnceFlag`] per [`NoticeEvent`], publishing to the event bus.
pub struct NoticeDebouncer {
    flags: Mutex<HashMap<NoticeEvent, DismissOnceFlag>>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl NoticeDebouncer {
    pub fn new(cooldowns: NoticeCooldowns, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        let flags = HashMap::from([
            (NoticeEvent::Maintenance, DismissOnceFlag::new(cooldowns.maintenance)),
            (NoticeEvent::NetworkError, DismissOnceFlag::new(cooldowns.network_error)),
            (
                NoticeEvent::SessionExpired,
                DismissOnceFlag::new(cooldowns.session_expired),
            ),
        ]);
        Self {
            flags: Mutex::new(flags),
            clock,
            events,
        }
    }

    /// Publish `notice` unless it is inside its cool-down. Returns whether it
    /// was published.
    pub fn notify(&self, notice: NoticeEvent) -> bool {
        let now = self.clock.now();
        let shown = self
            .flags
            .lock()
            .entry(notice)
            .or_insert_with(|| DismissOnceFlag::new(Duration::from_secs(1)))
            .trigger(now);

        if shown {
            debug!(?notice, "Showing notice");
            let _ = self.events.emit(CoreEvent::Notice(notice));
        } else {
            debug!(?notice, "Notice suppressed by cool-down");
        }
        shown
    }

    /// Forget every cool-down, e.g. after a new sign-in.
    pub fn reset(&self) {
        for flag in self.flags.lock().values_mut() {
            flag.reset();
        }
    }
}
