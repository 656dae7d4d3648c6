use crate::config::SubscriptionConfig;
use crate::events::EventCategory;
use crate::services::window_manager::SubscriptionTask;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Connecting,
    Live,
    Reconnecting,
    Failed,
}

/// Параметры проверки здоровья подписок
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    pub interval: Duration,
    pub stale_multiplier: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_attempts: u32,
}

impl HealthPolicy {
    pub fn from_config(config: &SubscriptionConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.health_interval_ms),
            stale_multiplier: config.stale_multiplier,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.interval * self.stale_multiplier
    }

    /// Экспоненциальная задержка: base * 2^attempt, не больше backoff_max
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// Снимок состояния подписки для диагностики
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub category: EventCategory,
    pub state: SubscriptionState,
    pub live: bool,
    pub idle_ms: Option<u64>,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    pub generation: u64,
}

/// Одна подписка на категорию событий и её здоровье.
///
/// `live` истинно только сразу после установки или если событие пришло в
/// пределах окна здоровья; нарушение ведёт к переподключению.
#[derive(Debug)]
pub struct EventSubscription {
    pub category: EventCategory,
    pub state: SubscriptionState,
    pub live: bool,
    pub established_at: Option<Instant>,
    pub last_event_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u32,
    pub generation: u64,
    next_attempt_at: Option<Instant>,
    task: SubscriptionTask,
}

impl EventSubscription {
    pub fn new(category: EventCategory) -> Self {
        Self {
            category,
            state: SubscriptionState::Connecting,
            live: false,
            established_at: None,
            last_event_at: None,
            consecutive_failures: 0,
            reconnect_attempts: 0,
            generation: 0,
            next_attempt_at: None,
            task: SubscriptionTask::detached(),
        }
    }

    /// Номер поколения для следующей попытки подписки
    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn mark_established(&mut self, task: SubscriptionTask, now: Instant) {
        // Старая задача прерывается при замене
        self.task = task;
        self.state = SubscriptionState::Live;
        self.live = true;
        self.established_at = Some(now);
        self.next_attempt_at = None;
        // Счётчики сбрасывают только первое событие или `settle`
    }

    /// Учесть событие; события устаревших поколений игнорируются
    pub fn record_event(&mut self, generation: u64, now: Instant) -> bool {
        if generation != self.generation || self.state != SubscriptionState::Live {
            return false;
        }
        self.last_event_at = Some(now);
        self.live = true;
        self.reset_failures();
        true
    }

    /// Подписка без событий считается здоровой, если прожила один интервал проверки
    pub fn settle(&mut self, policy: &HealthPolicy, now: Instant) {
        if !self.live || self.state != SubscriptionState::Live {
            return;
        }
        let survived = self
            .established_at
            .is_some_and(|at| now.saturating_duration_since(at) >= policy.interval);
        if survived {
            self.reset_failures();
        }
    }

    fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
        self.reconnect_attempts = 0;
    }

    /// Последний признак жизни: событие или момент установки
    fn last_activity(&self) -> Option<Instant> {
        match (self.last_event_at, self.established_at) {
            (Some(event), Some(established)) => Some(event.max(established)),
            (event, established) => event.or(established),
        }
    }

    /// Проверка здоровья. Возвращает true, если подписка признана мёртвой
    pub fn check_stale(&mut self, policy: &HealthPolicy, now: Instant) -> bool {
        if !self.live || !self.category.is_chatty() {
            return false;
        }
        let Some(last) = self.last_activity() else {
            return false;
        };
        if now.saturating_duration_since(last) <= policy.stale_after() {
            return false;
        }
        self.live = false;
        true
    }

    /// Потеря подписки (поток закрыт или не удалось подписаться)
    pub fn mark_lost(&mut self) {
        self.live = false;
        self.consecutive_failures += 1;
        self.task = SubscriptionTask::detached();
    }

    /// Запланировать переподключение. `None` - попытки исчерпаны, подписка Failed
    pub fn schedule_reconnect(&mut self, policy: &HealthPolicy, now: Instant) -> Option<Instant> {
        if self.reconnect_attempts >= policy.max_attempts {
            self.state = SubscriptionState::Failed;
            self.live = false;
            self.next_attempt_at = None;
            return None;
        }

        let delay = policy.backoff(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        self.state = SubscriptionState::Reconnecting;
        let at = now + delay;
        self.next_attempt_at = Some(at);
        Some(at)
    }

    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.next_attempt_at
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.next_attempt_at.is_some_and(|at| at <= now)
    }

    pub fn snapshot(&self, now: Instant) -> SubscriptionSnapshot {
        SubscriptionSnapshot {
            category: self.category,
            state: self.state,
            live: self.live,
            idle_ms: self
                .last_activity()
                .map(|last| now.saturating_duration_since(last).as_millis() as u64),
            consecutive_failures: self.consecutive_failures,
            reconnect_attempts: self.reconnect_attempts,
            generation: self.generation,
        }
    }
}
