use crate::reason::{Command, Priority, Reason};
use crate::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};
use uuid::Uuid;

/// One effective restart/stop request built from a burst of triggers.
#[derive(Debug, Clone, Serialize)]
pub struct CoalescedRequest {
    pub id: Uuid,
    /// Every reason folded into this request, in arrival order. Duplicates
    /// are kept for audit.
    pub reasons: Vec<Reason>,
    /// `Stop` if any folded trigger asked to stop, else `Start` if any asked
    /// to start, else `Reload`.
    pub command: Command,
    /// Reasons of a window that a stop discarded.
    pub superseded: Vec<Reason>,
    #[serde(skip)]
    pub window_start: Instant,
    #[serde(skip)]
    pub window_end: Instant,
    pub opened_at: DateTime<Utc>,
}

impl CoalescedRequest {
    fn new(reasons: Vec<Reason>, command: Command, window_start: Instant, window_end: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            reasons,
            command,
            superseded: Vec::new(),
            window_start,
            window_end,
            opened_at: Utc::now(),
        }
    }

    /// Build a request for a single trigger, bypassing any window.
    pub fn immediate(event: &TriggerEvent, now: Instant) -> Self {
        Self::new(vec![event.reason.clone()], event.command, now, now)
    }

    pub fn is_stop(&self) -> bool {
        self.command == Command::Stop
    }

    pub fn window(&self) -> Duration {
        self.window_end.saturating_duration_since(self.window_start)
    }

    /// Reasons with duplicates removed, first occurrence wins.
    pub fn distinct_reasons(&self) -> Vec<Reason> {
        let mut distinct: Vec<Reason> = Vec::with_capacity(self.reasons.len());
        for reason in &self.reasons {
            if !distinct.contains(reason) {
                distinct.push(reason.clone());
            }
        }
        distinct
    }

    pub fn summary(&self) -> String {
        self.distinct_reasons()
            .iter()
            .map(Reason::describe)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Fold a later request into this one.
    ///
    /// A stop dominates every merge, in either order. Reasons of the
    /// non-stop side are kept in `superseded`.
    pub fn merge(mut self, mut later: CoalescedRequest) -> CoalescedRequest {
        let command = match (self.command, later.command) {
            (Command::Stop, _) | (_, Command::Stop) => Command::Stop,
            (Command::Start, _) | (_, Command::Start) => Command::Start,
            (Command::Reload, Command::Reload) => Command::Reload,
        };

        if command == Command::Stop && self.command != Command::Stop {
            self.superseded.append(&mut self.reasons);
        }
        if command == Command::Stop && later.command != Command::Stop {
            self.superseded.append(&mut later.reasons);
        }

        self.reasons.extend(later.reasons);
        self.superseded.extend(later.superseded);
        self.command = command;
        self.window_start = self.window_start.min(later.window_start);
        self.window_end = self.window_end.max(later.window_end);
        self
    }
}

struct Window {
    start: Instant,
    deadline: Instant,
    reasons: Vec<Reason>,
    command: Command,
}

/// What happened to a folded trigger.
#[derive(Debug)]
pub enum FoldOutcome {
    /// A new window was opened and closes at `deadline`.
    Opened { deadline: Instant },
    /// The trigger joined the open window.
    Folded { deadline: Instant, extended: bool },
    /// An explicit stop bypassed debouncing; any open window was discarded.
    Preempted(CoalescedRequest),
}

/// Debounce state for one managed service.
///
/// Time is passed in explicitly so the engine is deterministic; the
/// coordinator drives it from the tokio clock.
pub struct CoalescingEngine {
    debounce_interval: Duration,
    max_window: Duration,
    window: Option<Window>,
}

impl CoalescingEngine {
    pub fn new(debounce_interval: Duration, max_window: Duration) -> Self {
        Self {
            debounce_interval,
            max_window: max_window.max(debounce_interval),
            window: None,
        }
    }

    pub fn debounce_interval(&self) -> Duration {
        self.debounce_interval
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// When the open window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        self.window.as_ref().map(|window| window.deadline)
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }

    pub fn fold(&mut self, event: TriggerEvent, now: Instant) -> FoldOutcome {
        if event.is_stop() {
            let mut request = CoalescedRequest::immediate(&event, now);
            if let Some(window) = self.window.take() {
                info!(
                    "Stop ({}) preempted open window with {} reason(s)",
                    event.reason.describe(),
                    window.reasons.len()
                );
                request.superseded = window.reasons;
            }
            return FoldOutcome::Preempted(request);
        }

        match self.window.as_mut() {
            None => {
                let deadline = now + self.debounce_interval;
                debug!(
                    "Opened debounce window for {} (closes in {:?})",
                    event.reason.describe(),
                    self.debounce_interval
                );
                self.window = Some(Window {
                    start: now,
                    deadline,
                    reasons: vec![event.reason],
                    command: event.command,
                });
                FoldOutcome::Opened { deadline }
            }
            Some(window) => {
                let mut extended = false;
                if event.priority == Priority::User {
                    let ceiling = window.start + self.max_window;
                    let candidate = (now + self.debounce_interval).min(ceiling);
                    if candidate > window.deadline {
                        window.deadline = candidate;
                        extended = true;
                    }
                }
                if event.command == Command::Start {
                    window.command = Command::Start;
                }
                trace!(
                    "Folded {} into window ({} reasons, extended: {})",
                    event.reason.describe(),
                    window.reasons.len() + 1,
                    extended
                );
                window.reasons.push(event.reason);
                FoldOutcome::Folded {
                    deadline: window.deadline,
                    extended,
                }
            }
        }
    }

    /// Close the window and emit its request.
    pub fn close(&mut self, now: Instant) -> Option<CoalescedRequest> {
        let window = self.window.take()?;
        let request = CoalescedRequest::new(window.reasons, window.command, window.start, now);
        debug!(
            "Closed debounce window after {:?}: {}",
            request.window(),
            request.summary()
        );
        Some(request)
    }

    /// Close the window only if its deadline has passed.
    pub fn close_if_due(&mut self, now: Instant) -> Option<CoalescedRequest> {
        if self.is_due(now) {
            self.close(now)
        } else {
            None
        }
    }

    /// Drop the open window without emitting anything.
    pub fn discard(&mut self) -> Vec<Reason> {
        self.window
            .take()
            .map(|window| window.reasons)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::ProducerId;

    const WINDOW: Duration = Duration::from_millis(500);

    fn engine() -> CoalescingEngine {
        CoalescingEngine::new(WINDOW, Duration::from_secs(2))
    }

    fn trigger(reason: Reason) -> TriggerEvent {
        TriggerEvent::new(reason, ProducerId::new("test"))
    }

    #[test]
    fn test_burst_collapses_into_one_request_in_order() {
        let mut engine = engine();
        let t0 = Instant::now();
        let reasons = vec![
            Reason::PackageAdded,
            Reason::RuleChanged,
            Reason::NetworkAvailable,
            Reason::RuleChanged,
        ];

        for (i, reason) in reasons.iter().enumerate() {
            let outcome = engine.fold(trigger(reason.clone()), t0 + Duration::from_millis(50 * i as u64));
            if i == 0 {
                assert!(matches!(outcome, FoldOutcome::Opened { .. }));
            } else {
                assert!(matches!(outcome, FoldOutcome::Folded { extended: false, .. }));
            }
        }

        assert!(engine.close_if_due(t0 + Duration::from_millis(499)).is_none());
        let request = engine.close_if_due(t0 + WINDOW).unwrap();
        assert_eq!(request.reasons, reasons);
        assert_eq!(request.command, Command::Reload);
        assert_eq!(request.distinct_reasons().len(), 3);
        assert!(!engine.is_open());
    }

    #[test]
    fn test_background_triggers_never_extend_window() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.fold(trigger(Reason::ConnectivityChanged), t0);
        for i in 1..20 {
            engine.fold(trigger(Reason::LinkPropertiesChanged), t0 + Duration::from_millis(20 * i));
        }
        assert_eq!(engine.deadline(), Some(t0 + WINDOW));
    }

    #[test]
    fn test_user_trigger_extends_window_up_to_ceiling() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.fold(trigger(Reason::ConnectivityChanged), t0);

        let at = t0 + Duration::from_millis(400);
        match engine.fold(trigger(Reason::UI), at) {
            FoldOutcome::Folded { deadline, extended } => {
                assert!(extended);
                assert_eq!(deadline, at + WINDOW);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let late = t0 + Duration::from_millis(1900);
        engine.fold(trigger(Reason::Tile), late);
        assert_eq!(engine.deadline(), Some(t0 + Duration::from_secs(2)));
    }

    #[test]
    fn test_stop_preempts_open_window() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.fold(trigger(Reason::RuleChanged), t0);

        match engine.fold(trigger(Reason::SwitchOff), t0 + Duration::from_millis(100)) {
            FoldOutcome::Preempted(request) => {
                assert!(request.is_stop());
                assert_eq!(request.reasons, vec![Reason::SwitchOff]);
                assert_eq!(request.superseded, vec![Reason::RuleChanged]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!engine.is_open());
    }

    #[test]
    fn test_start_command_marks_window() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.fold(trigger(Reason::RuleChanged), t0);
        engine.fold(trigger(Reason::Prepared), t0);
        let request = engine.close(t0 + WINDOW).unwrap();
        assert_eq!(request.command, Command::Start);
    }

    #[test]
    fn test_new_window_after_close() {
        let mut engine = engine();
        let t0 = Instant::now();
        engine.fold(trigger(Reason::HostsImport), t0);
        engine.close(t0 + WINDOW).unwrap();

        let outcome = engine.fold(trigger(Reason::DnsCleanup), t0 + WINDOW);
        assert!(matches!(outcome, FoldOutcome::Opened { .. }));
        assert_eq!(engine.discard(), vec![Reason::DnsCleanup]);
    }

    #[test]
    fn test_merge_rules() {
        let t0 = Instant::now();
        let reload = CoalescedRequest::new(vec![Reason::RuleChanged], Command::Reload, t0, t0);
        let stop = CoalescedRequest::new(vec![Reason::SwitchOff], Command::Stop, t0, t0);
        let start = CoalescedRequest::new(vec![Reason::UI], Command::Start, t0, t0);

        let merged = reload.clone().merge(stop.clone());
        assert!(merged.is_stop());
        assert_eq!(merged.reasons, vec![Reason::SwitchOff]);
        assert_eq!(merged.superseded, vec![Reason::RuleChanged]);

        let merged = stop.clone().merge(reload.clone());
        assert!(merged.is_stop());
        assert_eq!(merged.reasons, vec![Reason::SwitchOff]);
        assert_eq!(merged.superseded, vec![Reason::RuleChanged]);

        let merged = stop.clone().merge(start.clone());
        assert!(merged.is_stop());
        assert_eq!(merged.reasons, vec![Reason::SwitchOff]);
        assert_eq!(merged.superseded, vec![Reason::UI]);

        let merged = start.merge(stop);
        assert!(merged.is_stop());
        assert_eq!(merged.superseded, vec![Reason::UI]);

        let a = CoalescedRequest::new(vec![Reason::PackageAdded], Command::Reload, t0, t0);
        let merged = a.merge(reload);
        assert_eq!(merged.reasons, vec![Reason::PackageAdded, Reason::RuleChanged]);
        assert_eq!(merged.command, Command::Reload);
    }
}
