use crate::events::{WindowEventType, WindowHandle};
use crate::services::subscription::SubscriptionSnapshot;
use crate::utils::{unix_millis, RingBuffer};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDetectionMethod {
    /// Разрыв в монотонной последовательности идентификаторов новых окон
    HandleSequence,
}

/// Подозрение на пропущенные события. Только диагностика.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventGap {
    pub last_seen: u64,
    pub next_seen: u64,
    pub gap_size: u64,
    #[serde(skip, default = "Instant::now")]
    pub detected_at: Instant,
    pub detected_unix_ms: u64,
    pub method: GapDetectionMethod,
    pub subscriptions: Vec<SubscriptionSnapshot>,
    /// Заполняется, если пропущенный идентификатор позже всё же появился
    pub resolution: Option<String>,
}

impl EventGap {
    fn contains(&self, id: u64) -> bool {
        id > self.last_seen && id < self.next_seen
    }
}

/// Эвристика пропущенных событий по идентификаторам окон.
///
/// Оконный менеджер обычно выдаёт идентификаторы монотонно, но они
/// используются и для контейнеров, поэтому разрыв - не доказательство потери.
/// Детектор ничего не блокирует и не влияет на размещение.
#[derive(Debug)]
pub struct EventGapDetector {
    last_seen: Option<u64>,
    gaps: RingBuffer<EventGap>,
    total_detected: u64,
}

impl EventGapDetector {
    pub fn new(capacity: usize) -> Self {
        Self {
            last_seen: None,
            gaps: RingBuffer::new(capacity),
            total_detected: 0,
        }
    }

    /// Учесть событие окна. Возвращает обнаруженный разрыв, если он есть.
    ///
    /// `subscriptions` вычисляется лениво, только при обнаружении разрыва.
    pub fn observe(
        &mut self,
        handle: WindowHandle,
        change: WindowEventType,
        now: Instant,
        subscriptions: impl FnOnce() -> Vec<SubscriptionSnapshot>,
    ) -> Option<&EventGap> {
        let id = handle.value();

        // Любое событие с идентификатором внутри разрыва объясняет его
        self.resolve_late(id, change);

        if change != WindowEventType::New {
            return None;
        }

        let highest = self.last_seen.map_or(id, |last| last.max(id));
        let last = self.last_seen.replace(highest)?;
        if id <= last || id - last <= 1 {
            return None;
        }

        let gap = EventGap {
            last_seen: last,
            next_seen: id,
            gap_size: id - last,
            detected_at: now,
            detected_unix_ms: unix_millis(),
            method: GapDetectionMethod::HandleSequence,
            subscriptions: subscriptions(),
            resolution: None,
        };
        debug!(
            "Возможный пропуск событий: {} -> {} (разрыв {})",
            gap.last_seen, gap.next_seen, gap.gap_size
        );

        self.total_detected += 1;
        self.gaps.push(gap);
        self.gaps.last()
    }

    fn resolve_late(&mut self, id: u64, change: WindowEventType) {
        for gap in self.gaps.iter_mut().rev() {
            if gap.resolution.is_none() && gap.contains(id) {
                gap.resolution = Some(format!("id {} появился позже (событие {:?})", id, change));
                debug!("Разрыв {} -> {} объяснён: {}", gap.last_seen, gap.next_seen, id);
                return;
            }
        }
    }

    pub fn gaps(&self) -> impl DoubleEndedIterator<Item = &EventGap> {
        self.gaps.iter()
    }

    pub fn total_detected(&self) -> u64 {
        self.total_detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observe(detector: &mut EventGapDetector, id: u64, change: WindowEventType) -> Option<u64> {
        detector
            .observe(WindowHandle(id), change, Instant::now(), Vec::new)
            .map(|gap| gap.gap_size)
    }

    #[tokio::test]
    async fn contiguous_handles_produce_no_gap() {
        let mut detector = EventGapDetector::new(10);
        assert_eq!(observe(&mut detector, 10, WindowEventType::New), None);
        assert_eq!(observe(&mut detector, 11, WindowEventType::New), None);
        assert_eq!(observe(&mut detector, 12, WindowEventType::New), None);
        assert_eq!(detector.total_detected(), 0);
    }

    #[tokio::test]
    async fn jump_produces_gap_with_size() {
        let mut detector = EventGapDetector::new(10);
        observe(&mut detector, 10, WindowEventType::New);
        assert_eq!(observe(&mut detector, 15, WindowEventType::New), Some(5));

        let gap = detector.gaps().next().unwrap();
        assert_eq!((gap.last_seen, gap.next_seen), (10, 15));
        assert_eq!(gap.method, GapDetectionMethod::HandleSequence);
        assert!(gap.resolution.is_none());
    }

    #[tokio::test]
    async fn late_arrival_resolves_gap() {
        let mut detector = EventGapDetector::new(10);
        observe(&mut detector, 10, WindowEventType::New);
        observe(&mut detector, 13, WindowEventType::New);
        assert_eq!(observe(&mut detector, 12, WindowEventType::Title), None);

        let gap = detector.gaps().next().unwrap();
        assert!(gap.resolution.as_deref().unwrap().contains("12"));
        // Старые идентификаторы не сдвигают последовательность назад
        assert_eq!(observe(&mut detector, 14, WindowEventType::New), None);
    }

    #[tokio::test]
    async fn non_creation_events_do_not_advance_sequence() {
        let mut detector = EventGapDetector::new(10);
        observe(&mut detector, 10, WindowEventType::New);
        observe(&mut detector, 50, WindowEventType::Focus);
        assert_eq!(observe(&mut detector, 11, WindowEventType::New), None);
    }

    #[tokio::test]
    async fn retention_is_bounded() {
        let mut detector = EventGapDetector::new(2);
        for id in [1, 5, 10, 20] {
            observe(&mut detector, id, WindowEventType::New);
        }
        assert_eq!(detector.total_detected(), 3);
        assert_eq!(detector.gaps().count(), 2);
    }
}
