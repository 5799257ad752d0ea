/// 大量生成リクエストの検知とバルクモード管理。
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use super::DiversityTunables;
use crate::util::time::{Clock, elapsed_between};

#[derive(Debug, Default)]
struct BulkState {
    active: bool,
    manual: bool,
    started_at: Option<DateTime<Utc>>,
    estimated_size: Option<usize>,
    trend_attempts: u32,
}

/// 管理APIに返すバルクモードの状態。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkModeSnapshot {
    pub active: bool,
    pub manual: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_size: Option<usize>,
    pub trend_attempts: u32,
    pub max_trend_attempts: u32,
}

pub struct BulkModeController {
    state: Mutex<BulkState>,
    clock: Arc<dyn Clock>,
    threshold: usize,
    auto_expire: Duration,
    max_trend_attempts: u32,
}

impl BulkModeController {
    #[must_use]
    pub fn new(tunables: &DiversityTunables, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(BulkState::default()),
            clock,
            threshold: tunables.bulk_threshold,
            auto_expire: tunables.bulk_auto_expire,
            max_trend_attempts: tunables.max_trend_attempts,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BulkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// リクエストの件数ヒントを観測し、必要に応じてバルクモードを切り替える。
    ///
    /// 自動で有効化されたバルクモードは一定時間で解除される。手動設定は解除されない。
    /// 観測後のバルクモード状態を返す。
    pub fn observe(&self, bulk_size_hint: Option<usize>) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();

        if state.active && !state.manual {
            let expired = state
                .started_at
                .is_none_or(|started| elapsed_between(started, now) >= self.auto_expire);
            if expired {
                info!(
                    started_at = ?state.started_at,
                    estimated_size = ?state.estimated_size,
                    "bulk mode expired"
                );
                *state = BulkState::default();
            }
        }

        if let Some(hint) = bulk_size_hint {
            if hint >= self.threshold && !state.active {
                *state = BulkState {
                    active: true,
                    manual: false,
                    started_at: Some(now),
                    estimated_size: Some(hint),
                    trend_attempts: 0,
                };
                info!(
                    bulk_size_hint = hint,
                    threshold = self.threshold,
                    "bulk mode activated"
                );
            }
        }

        state.active
    }

    /// 管理者による手動切り替え。トレンド再取得の試行回数もリセットする。
    pub fn set_manual(&self, enabled: bool, estimated_size: Option<usize>) -> BulkModeSnapshot {
        let now = self.clock.now();
        let mut state = self.lock();
        *state = BulkState {
            active: enabled,
            manual: enabled,
            started_at: enabled.then_some(now),
            estimated_size: if enabled { estimated_size } else { None },
            trend_attempts: 0,
        };
        info!(enabled, estimated_size = ?estimated_size, "bulk mode set manually");
        self.snapshot_locked(&state)
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    #[must_use]
    pub fn snapshot(&self) -> BulkModeSnapshot {
        let state = self.lock();
        self.snapshot_locked(&state)
    }

    /// 強制リフレッシュの枠を1つ確保する。上限に達していれば `None`。
    pub fn begin_trend_attempt(&self) -> Option<u32> {
        let mut state = self.lock();
        if state.trend_attempts >= self.max_trend_attempts {
            return None;
        }
        state.trend_attempts += 1;
        Some(state.trend_attempts)
    }

    #[must_use]
    pub fn trend_attempts(&self) -> u32 {
        self.lock().trend_attempts
    }

    pub fn reset_trend_attempts(&self) {
        self.lock().trend_attempts = 0;
    }

    fn snapshot_locked(&self, state: &BulkState) -> BulkModeSnapshot {
        BulkModeSnapshot {
            active: state.active,
            manual: state.manual,
            started_at: state.started_at,
            estimated_size: state.estimated_size,
            trend_attempts: state.trend_attempts,
            max_trend_attempts: self.max_trend_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::time::ManualClock;

    fn controller() -> (Arc<ManualClock>, BulkModeController) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        let controller = BulkModeController::new(&DiversityTunables::default(), clock.clone());
        (clock, controller)
    }

    #[test]
    fn activates_at_threshold_only() {
        let (_clock, controller) = controller();
        assert!(!controller.observe(None));
        assert!(!controller.observe(Some(49)));
        assert!(controller.observe(Some(50)));
        assert!(controller.is_active());
        assert_eq!(controller.snapshot().estimated_size, Some(50));
    }

    #[test]
    fn automatic_bulk_mode_expires_after_thirty_minutes() {
        let (clock, controller) = controller();
        controller.observe(Some(120));

        clock.advance(Duration::from_secs(29 * 60));
        assert!(controller.observe(None));

        clock.advance(Duration::from_secs(60));
        assert!(!controller.observe(None));
        assert!(!controller.is_active());
    }

    #[test]
    fn sustained_demand_reactivates_after_expiry() {
        let (clock, controller) = controller();
        controller.observe(Some(80));
        clock.advance(Duration::from_secs(31 * 60));
        assert!(controller.observe(Some(80)));
        assert_eq!(controller.snapshot().started_at, Some(clock.now()));
    }

    #[test]
    fn manual_override_does_not_expire() {
        let (clock, controller) = controller();
        let snapshot = controller.set_manual(true, Some(300));
        assert!(snapshot.active && snapshot.manual);

        clock.advance(Duration::from_secs(3 * 3600));
        assert!(controller.observe(None));

        let snapshot = controller.set_manual(false, Some(300));
        assert!(!snapshot.active);
        assert_eq!(snapshot.estimated_size, None);
    }

    #[test]
    fn trend_attempt_budget_is_bounded_and_reset_by_manual_override() {
        let (_clock, controller) = controller();
        assert_eq!(controller.begin_trend_attempt(), Some(1));
        assert_eq!(controller.begin_trend_attempt(), Some(2));
        assert_eq!(controller.begin_trend_attempt(), Some(3));
        assert_eq!(controller.begin_trend_attempt(), None);

        controller.set_manual(true, None);
        assert_eq!(controller.trend_attempts(), 0);
        assert_eq!(controller.begin_trend_attempt(), Some(1));

        controller.reset_trend_attempts();
        assert_eq!(controller.trend_attempts(), 0);
    }
}
