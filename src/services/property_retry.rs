use crate::events::{EngineMessage, WindowCreationEvent};
use crate::services::window_manager::WindowManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Результат единственной перепроверки свойств окна
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Свойства появились
    Completed(WindowCreationEvent),
    /// Всё ещё не заполнены; разрешаем с тем, что есть
    StillIncomplete(WindowCreationEvent),
    /// Окна больше нет; молча отбрасываем
    Vanished,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    pub scheduled: u64,
    pub completed: u64,
    pub still_incomplete: u64,
    pub vanished: u64,
}

/// Одна отложенная перепроверка для окон без идентифицирующих свойств.
///
/// Повтор не отдельный таймерный поток: через `delay` событие возвращается в
/// общий входной канал координатора как [`EngineMessage::Recheck`]. Однажды
/// запланированный повтор не отменяется.
pub struct PropertyCompletionRetry {
    delay: Duration,
    sink: mpsc::Sender<EngineMessage>,
    window_manager: Arc<dyn WindowManager>,
    stats: RetryStats,
}

impl PropertyCompletionRetry {
    pub fn new(delay: Duration, sink: mpsc::Sender<EngineMessage>, window_manager: Arc<dyn WindowManager>) -> Self {
        Self {
            delay,
            sink,
            window_manager,
            stats: RetryStats::default(),
        }
    }

    pub fn schedule(&mut self, event: WindowCreationEvent) {
        debug!(
            "Свойства окна {} не заполнены, перепроверка через {}ms",
            event.handle(),
            self.delay.as_millis()
        );
        self.stats.scheduled += 1;

        let sink = self.sink.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = sink.send(EngineMessage::Recheck(event)).await;
        });
    }

    /// Свежий снимок окна. Ровно одна попытка, дальше не повторяем.
    pub async fn complete(&mut self, event: &WindowCreationEvent) -> RetryOutcome {
        let fresh = match self.window_manager.get_window(event.handle()).await {
            Ok(Some(window)) => window,
            Ok(None) => {
                self.stats.vanished += 1;
                debug!("Окно {} исчезло до перепроверки свойств", event.handle());
                return RetryOutcome::Vanished;
            }
            Err(e) => {
                // Запрос не удался: продолжаем со старым снимком
                warn!("Перепроверка свойств окна {} не удалась: {}", event.handle(), e);
                self.stats.still_incomplete += 1;
                return RetryOutcome::StillIncomplete(event.superseded_by(event.window.clone()));
            }
        };

        let next = event.superseded_by(fresh);
        if next.has_complete_properties {
            self.stats.completed += 1;
            info!("Перепроверка успешна: {}", next.window);
            RetryOutcome::Completed(next)
        } else {
            self.stats.still_incomplete += 1;
            warn!(
                "Свойства окна {} не появились после перепроверки, разрешаем с неполными данными",
                next.handle()
            );
            RetryOutcome::StillIncomplete(next)
        }
    }

    pub fn stats(&self) -> RetryStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{WindowHandle, WindowInfo};
    use crate::services::window_manager::DryRunWindowManager;

    fn setup() -> (
        PropertyCompletionRetry,
        Arc<DryRunWindowManager>,
        mpsc::Receiver<EngineMessage>,
    ) {
        let wm = Arc::new(DryRunWindowManager::new());
        let (tx, rx) = mpsc::channel(8);
        let retry = PropertyCompletionRetry::new(Duration::from_millis(100), tx, wm.clone());
        (retry, wm, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn recheck_is_reinjected_after_delay() {
        let (mut retry, _wm, mut rx) = setup();
        let event = WindowCreationEvent::new(WindowInfo::new(9));
        let started = tokio::time::Instant::now();

        retry.schedule(event.clone());

        match rx.recv().await.unwrap() {
            EngineMessage::Recheck(rechecked) => assert_eq!(rechecked, event),
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(retry.stats().scheduled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_sees_late_properties() {
        let (mut retry, wm, _rx) = setup();
        let handle = WindowHandle(9);
        wm.create_window(WindowInfo::new(9)).await;
        let event = WindowCreationEvent::new(WindowInfo::new(9));

        wm.update_window(handle, |w| w.app_id = Some("slack".into()));

        match retry.complete(&event).await {
            RetryOutcome::Completed(next) => {
                assert_eq!(next.window.identifier(), Some("slack"));
                assert!(next.rechecked);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(retry.stats().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn still_incomplete_and_vanished() {
        let (mut retry, wm, _rx) = setup();
        wm.create_window(WindowInfo::new(9)).await;
        let event = WindowCreationEvent::new(WindowInfo::new(9));

        assert!(matches!(retry.complete(&event).await, RetryOutcome::StillIncomplete(_)));

        wm.remove_window(WindowHandle(9));
        assert_eq!(retry.complete(&event).await, RetryOutcome::Vanished);
        assert_eq!(retry.stats().vanished, 1);
    }
}
