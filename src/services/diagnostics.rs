use crate::events::{WindowCreationEvent, WindowHandle};
use crate::services::gap_detector::EventGap;
use crate::services::launch_registry::RegistryStats;
use crate::services::resolver::ResolutionTier;
use crate::services::subscription::SubscriptionSnapshot;
use crate::utils::{unix_millis, RingBuffer};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

/// Итог попытки назначения
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// Окно подтвердило целевой рабочий стол
    Confirmed,
    /// Окно уже было на цели, команда не отправлялась
    AlreadyOnTarget,
    /// Ни один уровень каскада не подошёл, окно осталось на месте
    NoMatch,
    /// Цель вне поддерживаемого диапазона, команда не отправлялась
    InvalidTargetWorkspace,
    /// Оконный менеджер явно вернул ошибку
    CommandRejected,
    /// Команда принята, но цель не наблюдалась до таймаута
    ConfirmationTimeout,
    /// Окно исчезло до подтверждения
    WindowVanished,
}

/// Как исход выглядит для человека
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    Placed,
    /// Ожидаемо и безвредно
    Benign,
    /// Окно отказалось или проигнорировало команду, можно повторить вручную
    Transient,
    /// Ошибка в конфигурации оператора
    ConfigurationBug,
}

impl AssignmentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            AssignmentOutcome::Confirmed | AssignmentOutcome::AlreadyOnTarget | AssignmentOutcome::NoMatch
        )
    }

    pub fn class(&self) -> OutcomeClass {
        match self {
            AssignmentOutcome::Confirmed | AssignmentOutcome::AlreadyOnTarget => OutcomeClass::Placed,
            AssignmentOutcome::NoMatch | AssignmentOutcome::WindowVanished => OutcomeClass::Benign,
            AssignmentOutcome::CommandRejected | AssignmentOutcome::ConfirmationTimeout => {
                OutcomeClass::Transient
            }
            AssignmentOutcome::InvalidTargetWorkspace => OutcomeClass::ConfigurationBug,
        }
    }
}

/// Запись истории назначений. Создаётся один раз на окно и не изменяется.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub window: WindowHandle,
    pub app_id: Option<String>,
    pub source_workspace: Option<u32>,
    pub target_workspace: Option<u32>,
    pub tier: Option<ResolutionTier>,
    #[serde(skip, default = "Instant::now")]
    pub received_at: Instant,
    #[serde(skip, default = "Instant::now")]
    pub completed_at: Instant,
    pub completed_unix_ms: u64,
    /// От отправки команды до подтверждения
    pub latency_ms: Option<u64>,
    /// От получения события до отправки команды
    pub queue_delay_ms: Option<u64>,
    pub launch_notification_used: bool,
    pub property_retry: bool,
    pub success: bool,
    pub outcome: AssignmentOutcome,
    pub error: Option<String>,
}

impl AssignmentRecord {
    pub fn new(event: &WindowCreationEvent, outcome: AssignmentOutcome) -> Self {
        Self {
            window: event.handle(),
            app_id: event.window.identifier().map(str::to_string),
            source_workspace: event.window.workspace,
            target_workspace: None,
            tier: None,
            received_at: event.received_at,
            completed_at: Instant::now(),
            completed_unix_ms: unix_millis(),
            latency_ms: None,
            queue_delay_ms: None,
            launch_notification_used: false,
            property_retry: event.rechecked,
            success: outcome.is_success(),
            outcome,
            error: None,
        }
    }

    /// Ничего не подошло: окно остаётся где было
    pub fn no_match(event: &WindowCreationEvent, launch_notification_used: bool) -> Self {
        let mut record = Self::new(event, AssignmentOutcome::NoMatch);
        record.launch_notification_used = launch_notification_used;
        record
    }

    pub fn with_target(mut self, workspace: u32, tier: ResolutionTier) -> Self {
        self.target_workspace = Some(workspace);
        self.tier = Some(tier);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = Some(latency.as_millis() as u64);
        self
    }

    pub fn total_latency(&self) -> Duration {
        self.completed_at.saturating_duration_since(self.received_at)
    }
}

/// Фильтр диагностического запроса
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsQuery {
    #[serde(default)]
    pub window: Option<u64>,
    /// Только записи за последние N миллисекунд
    #[serde(default)]
    pub since_ms: Option<u64>,
    #[serde(default)]
    pub outcome: Option<AssignmentOutcome>,
    #[serde(default)]
    pub failures_only: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl DiagnosticsQuery {
    fn window_matches(&self, handle: u64) -> bool {
        self.window.map_or(true, |w| w == handle)
    }

    fn time_matches(&self, at: Instant, now: Instant) -> bool {
        self.since_ms
            .map_or(true, |ms| now.saturating_duration_since(at) <= Duration::from_millis(ms))
    }

    fn record_matches(&self, record: &AssignmentRecord, now: Instant) -> bool {
        self.window_matches(record.window.value())
            && self.time_matches(record.completed_at, now)
            && self.outcome.map_or(true, |o| o == record.outcome)
            && (!self.failures_only || !record.success)
    }

    fn gap_matches(&self, gap: &EventGap, now: Instant) -> bool {
        let window_hit = self
            .window
            .map_or(true, |w| w == gap.last_seen || w == gap.next_seen || (w > gap.last_seen && w < gap.next_seen));
        window_hit && self.time_matches(gap.detected_at, now)
    }
}

/// Ответ на диагностический запрос, новые записи первыми
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub assignments: Vec<AssignmentRecord>,
    pub gaps: Vec<EventGap>,
    pub subscriptions: Vec<SubscriptionSnapshot>,
    pub pending_launches: usize,
    pub launch_stats: RegistryStats,
    pub evicted_records: u64,
}

/// Ограниченная история назначений
#[derive(Debug)]
pub struct AssignmentHistory {
    records: RingBuffer<AssignmentRecord>,
}

impl AssignmentHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RingBuffer::new(capacity),
        }
    }

    pub fn push(&mut self, record: AssignmentRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &AssignmentRecord> {
        self.records.iter()
    }

    pub fn for_window(&self, handle: WindowHandle) -> Vec<&AssignmentRecord> {
        self.records.iter().filter(|r| r.window == handle).collect()
    }

    pub fn evicted(&self) -> u64 {
        self.records.evicted()
    }

    pub fn query<'a>(
        &self,
        query: &DiagnosticsQuery,
        gaps: impl DoubleEndedIterator<Item = &'a EventGap>,
        now: Instant,
    ) -> (Vec<AssignmentRecord>, Vec<EventGap>) {
        let limit = query.limit.unwrap_or(usize::MAX);
        let records = self
            .records
            .iter()
            .rev()
            .filter(|r| query.record_matches(r, now))
            .take(limit)
            .cloned()
            .collect();
        let gaps = gaps
            .rev()
            .filter(|g| query.gap_matches(g, now))
            .take(limit)
            .cloned()
            .collect();
        (records, gaps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WindowInfo;

    fn record(handle: u64, outcome: AssignmentOutcome) -> AssignmentRecord {
        let event = WindowCreationEvent::new(WindowInfo::new(handle).with_app_id("app"));
        AssignmentRecord::new(&event, outcome)
    }

    #[test]
    fn outcome_classes_separate_operator_and_window_problems() {
        assert_eq!(AssignmentOutcome::InvalidTargetWorkspace.class(), OutcomeClass::ConfigurationBug);
        assert_eq!(AssignmentOutcome::ConfirmationTimeout.class(), OutcomeClass::Transient);
        assert_eq!(AssignmentOutcome::CommandRejected.class(), OutcomeClass::Transient);
        assert_eq!(AssignmentOutcome::NoMatch.class(), OutcomeClass::Benign);
        assert!(AssignmentOutcome::NoMatch.is_success());
        assert!(!AssignmentOutcome::ConfirmationTimeout.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn query_filters_and_orders_newest_first() {
        let mut history = AssignmentHistory::new(10);
        history.push(record(1, AssignmentOutcome::Confirmed));
        history.push(record(2, AssignmentOutcome::CommandRejected));
        history.push(record(3, AssignmentOutcome::Confirmed));

        let all = DiagnosticsQuery::default();
        let (records, _) = history.query(&all, std::iter::empty(), Instant::now());
        assert_eq!(
            records.iter().map(|r| r.window.value()).collect::<Vec<_>>(),
            vec![3, 2, 1]
        );

        let failures = DiagnosticsQuery {
            failures_only: true,
            ..Default::default()
        };
        let (records, _) = history.query(&failures, std::iter::empty(), Instant::now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AssignmentOutcome::CommandRejected);

        let by_window = DiagnosticsQuery {
            window: Some(1),
            ..Default::default()
        };
        let (records, _) = history.query(&by_window, std::iter::empty(), Instant::now());
        assert_eq!(records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn query_by_time_range() {
        let mut history = AssignmentHistory::new(10);
        history.push(record(1, AssignmentOutcome::Confirmed));
        tokio::time::advance(Duration::from_secs(10)).await;
        history.push(record(2, AssignmentOutcome::Confirmed));

        let recent = DiagnosticsQuery {
            since_ms: Some(5_000),
            ..Default::default()
        };
        let (records, _) = history.query(&recent, std::iter::empty(), Instant::now());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].window, WindowHandle(2));
    }

    #[test]
    fn query_deserializes_from_partial_json() {
        let query: DiagnosticsQuery =
            serde_json::from_str(r#"{"outcome":"confirmation_timeout","limit":5}"#).unwrap();
        assert_eq!(query.outcome, Some(AssignmentOutcome::ConfirmationTimeout));
        assert_eq!(query.limit, Some(5));
        assert!(!query.failures_only);
    }
}
