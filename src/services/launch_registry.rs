use crate::debug_if_enabled;
use crate::error::{PlacerError, Result};
use crate::events::{LaunchNotification, LaunchRequest, WindowInfo};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::time::{Duration, Instant};
use tracing::{debug, info};

// Сколько использованных ключей помнить для отказа в повторной регистрации
const RETIRED_KEYS: usize = 256;

/// Счётчики реестра для диагностики
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RegistryStats {
    pub registered: u64,
    pub rejected: u64,
    pub matched: u64,
    pub expired: u64,
    pub misses: u64,
}

/// Короткоживущее хранилище ожидаемых запусков.
///
/// TTL проверяется лениво при поиске, таймеров нет. Уведомление, ставшее
/// Matched или Expired, удаляется из активного набора и больше не сопоставляется.
#[derive(Debug, Clone)]
pub struct LaunchNotificationRegistry {
    active: HashMap<String, LaunchNotification>,
    retired: VecDeque<String>,
    retired_set: HashSet<String>,
    default_ttl: Duration,
    next_sequence: u64,
    stats: RegistryStats,
}

impl LaunchNotificationRegistry {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            active: HashMap::new(),
            retired: VecDeque::with_capacity(RETIRED_KEYS),
            retired_set: HashSet::new(),
            default_ttl,
            next_sequence: 0,
            stats: RegistryStats::default(),
        }
    }

    pub fn register(&mut self, request: LaunchRequest) -> Result<()> {
        self.register_at(request, Instant::now())
    }

    /// Дубликат ключа отклоняется, а не ставится в очередь
    pub fn register_at(&mut self, request: LaunchRequest, now: Instant) -> Result<()> {
        if self.active.contains_key(&request.id) || self.retired_set.contains(&request.id) {
            self.stats.rejected += 1;
            return Err(PlacerError::DuplicateNotification(request.id));
        }
        self.purge_expired(now);

        self.next_sequence += 1;
        let notification =
            LaunchNotification::from_request_at(request, self.default_ttl, self.next_sequence, now).inspect_err(
                |_| self.stats.rejected += 1,
            )?;

        info!(
            "Зарегистрирован запуск {} (ttl {}ms, ожидает {})",
            notification,
            notification.ttl.as_millis(),
            self.active.len()
        );
        self.stats.registered += 1;
        self.active.insert(notification.id.clone(), notification);
        Ok(())
    }

    /// Удалить истёкшие уведомления; возвращает количество удалённых
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .active
            .values()
            .filter(|n| n.is_expired_at(now))
            .map(|n| n.id.clone())
            .collect();

        for id in &expired {
            if let Some(mut notification) = self.active.remove(id) {
                notification.mark_expired();
                debug!("Уведомление {} истекло без совпадения", notification);
                self.retire(notification.id);
            }
        }

        self.stats.expired += expired.len() as u64;
        expired.len()
    }

    /// Найти лучшее ожидающее уведомление для окна и пометить его Matched.
    ///
    /// Лучшее - по оценке совпадения; при равенстве выигрывает зарегистрированное раньше.
    pub fn find_and_consume(&mut self, window: &WindowInfo, now: Instant) -> Option<LaunchNotification> {
        self.purge_expired(now);

        let best = self
            .active
            .values()
            .filter(|n| n.is_pending())
            .filter_map(|n| n.match_score(window).map(|score| (score, n.sequence, n.id.clone())))
            .max_by(|a, b| a.0.total_cmp(&b.0).then_with(|| b.1.cmp(&a.1)));

        let Some((score, _, id)) = best else {
            self.stats.misses += 1;
            debug_if_enabled!("Нет уведомления о запуске для {}", window);
            return None;
        };

        let mut notification = self.active.remove(&id)?;
        notification.mark_matched(window.handle, score);
        self.stats.matched += 1;
        self.retire(notification.id.clone());

        info!(
            "Окно {} сопоставлено с {} (уверенность {:.2})",
            window.handle, notification, score
        );
        Some(notification)
    }

    fn retire(&mut self, id: String) {
        if self.retired.len() == RETIRED_KEYS {
            if let Some(old) = self.retired.pop_front() {
                self.retired_set.remove(&old);
            }
        }
        self.retired_set.insert(id.clone());
        self.retired.push_back(id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending_count_at(Instant::now())
    }

    /// Истёкшие, но ещё не вычищенные уведомления не считаются
    pub fn pending_count_at(&self, now: Instant) -> usize {
        self.active
            .values()
            .filter(|n| n.is_pending() && !n.is_expired_at(now))
            .count()
    }

    pub fn stats(&self) -> RegistryStats {
        self.stats
    }
}
