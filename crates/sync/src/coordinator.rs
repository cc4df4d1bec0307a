use std::time::{Duration, Instant};

use notetree_settings::{CoalescePolicy, TreePreferences};
use notetree_tree::EntityEventKind;
use tracing::debug;

/// 儲存層的單一變更通知。 / A single change notification from the storage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEvent {
    pub kind: EntityEventKind,
    pub identifier: String,
}

impl EntityEvent {
    pub fn new(kind: EntityEventKind, identifier: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
        }
    }

    pub fn modified(identifier: impl Into<String>) -> Self {
        Self::new(EntityEventKind::Modified, identifier)
    }

    pub fn created(identifier: impl Into<String>) -> Self {
        Self::new(EntityEventKind::Created, identifier)
    }

    pub fn deleted(identifier: impl Into<String>) -> Self {
        Self::new(EntityEventKind::Deleted, identifier)
    }

    pub fn renamed(identifier: impl Into<String>) -> Self {
        Self::new(EntityEventKind::Renamed, identifier)
    }
}

/// 交給控制器執行的刷新要求。 / Refresh request handed to the owning controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRequest {
    /// Only content changed; each identifier may be patched in place.
    Incremental { identifiers: Vec<String> },
    Full,
}

/// 單一期限的尾緣去抖動計時器。 / Single-slot trailing-edge debounce timer.
///
/// Time never advances on its own: callers pass `now` in, which keeps the
/// timer deterministic under test.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// 重新起算期限，取代先前的期限。 / Re-arms the deadline, replacing any pending one.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    pub fn time_until(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

#[derive(Debug, Default)]
struct PendingWindow {
    modified: Vec<String>,
    structural: bool,
    last: Option<EntityEvent>,
    events: usize,
}

impl PendingWindow {
    fn push(&mut self, event: EntityEvent) {
        if event.kind.is_structural() {
            self.structural = true;
        } else if !self.modified.contains(&event.identifier) {
            self.modified.push(event.identifier.clone());
        }
        self.events += 1;
        self.last = Some(event);
    }

    fn into_request(self, policy: CoalescePolicy) -> RefreshRequest {
        match policy {
            CoalescePolicy::StructuralWins if self.structural => RefreshRequest::Full,
            CoalescePolicy::StructuralWins => RefreshRequest::Incremental {
                identifiers: self.modified,
            },
            CoalescePolicy::LastEventWins => match self.last {
                Some(event) if !event.kind.is_structural() => RefreshRequest::Incremental {
                    identifiers: vec![event.identifier],
                },
                _ => RefreshRequest::Full,
            },
        }
    }
}

/// 合併突發的變更事件並產生單一刷新要求。
/// Coalesces bursts of change events into one refresh request per quiet period.
#[derive(Debug)]
pub struct ChangeEventCoordinator {
    debouncer: Debouncer,
    policy: CoalescePolicy,
    pending: Option<PendingWindow>,
}

impl Default for ChangeEventCoordinator {
    fn default() -> Self {
        Self::from_preferences(&TreePreferences::default())
    }
}

impl ChangeEventCoordinator {
    pub fn new(delay: Duration, policy: CoalescePolicy) -> Self {
        Self {
            debouncer: Debouncer::new(delay),
            policy,
            pending: None,
        }
    }

    pub fn from_preferences(preferences: &TreePreferences) -> Self {
        Self::new(preferences.debounce(), preferences.coalesce_policy)
    }

    pub fn policy(&self) -> CoalescePolicy {
        self.policy
    }

    pub fn delay(&self) -> Duration {
        self.debouncer.delay()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 記錄事件並重新起算靜默期。 / Records an event and restarts the quiet period.
    pub fn on_entity_event(&mut self, event: EntityEvent, now: Instant) {
        debug!(kind = ?event.kind, identifier = %event.identifier, "queued change event");
        self.pending.get_or_insert_with(PendingWindow::default).push(event);
        self.debouncer.arm(now);
    }

    /// 靜默期結束時回傳合併後的要求。 / Yields the coalesced request once the quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<RefreshRequest> {
        if !self.debouncer.is_due(now) {
            return None;
        }
        self.flush()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    pub fn time_until_ready(&self, now: Instant) -> Option<Duration> {
        self.debouncer.time_until(now)
    }

    /// 立即送出待處理的要求（例如關閉前）。 / Emits the pending request immediately, e.g. at shutdown.
    pub fn flush(&mut self) -> Option<RefreshRequest> {
        self.debouncer.cancel();
        let window = self.pending.take()?;
        let events = window.events;
        let request = window.into_request(self.policy);
        debug!(events, ?request, "dispatching coalesced refresh");
        Some(request)
    }

    pub fn cancel(&mut self) {
        self.debouncer.cancel();
        self.pending = None;
    }
}
