use crate::config::EngineConfig;
use crate::events::{WindowCreationEvent, WindowHandle};
use crate::services::diagnostics::{AssignmentOutcome, AssignmentRecord};
use crate::services::resolver::Target;
use crate::services::window_manager::WindowManager;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

/// Итог ожидания подтверждения
enum Confirmation {
    Confirmed(Duration),
    Vanished,
    TimedOut,
}

/// Перемещает окно на целевой рабочий стол и ждёт подтверждения.
///
/// Подтверждение - опрос дерева окон: команда принята оконным менеджером
/// ещё не значит, что окно переехало.
pub struct AssignmentExecutor {
    window_manager: Arc<dyn WindowManager>,
    min_workspace: u32,
    max_workspace: u32,
    poll_interval: Duration,
    confirm_timeout: Duration,
    focus_after_move: bool,
}

impl AssignmentExecutor {
    pub fn new(window_manager: Arc<dyn WindowManager>, config: &EngineConfig) -> Self {
        Self {
            window_manager,
            min_workspace: config.min_workspace,
            max_workspace: config.max_workspace,
            poll_interval: Duration::from_millis(config.confirm_poll_interval_ms),
            confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
            focus_after_move: config.focus_after_move,
        }
    }

    fn in_range(&self, workspace: u32) -> bool {
        (self.min_workspace..=self.max_workspace).contains(&workspace)
    }

    /// Выполнить назначение. Всегда возвращает ровно одну запись истории.
    pub async fn execute(
        &self,
        event: &WindowCreationEvent,
        target: &Target,
        launch_notification_used: bool,
    ) -> AssignmentRecord {
        let handle = event.handle();
        let record = |outcome| {
            let mut record = AssignmentRecord::new(event, outcome).with_target(target.workspace, target.tier);
            record.launch_notification_used = launch_notification_used;
            record
        };

        if !self.in_range(target.workspace) {
            warn!(
                "Цель {} для {} вне диапазона {}..={} (уровень {}), команда не отправлена",
                target.workspace, handle, self.min_workspace, self.max_workspace, target.tier
            );
            return record(AssignmentOutcome::InvalidTargetWorkspace).with_error(format!(
                "workspace {} outside {}..={}",
                target.workspace, self.min_workspace, self.max_workspace
            ));
        }

        // Окно могло закрыться или переехать, пока шло разрешение
        let observed_workspace = match self.window_manager.get_window(handle).await {
            Ok(None) => {
                debug!("Окно {} исчезло до перемещения", handle);
                return record(AssignmentOutcome::WindowVanished);
            }
            Ok(Some(current)) if current.workspace == Some(target.workspace) => {
                info!("{} уже на рабочем столе {}", handle, target.workspace);
                return record(AssignmentOutcome::AlreadyOnTarget).with_latency(Duration::ZERO);
            }
            Ok(Some(current)) => current.workspace,
            Err(e) => {
                debug!("Не удалось получить окно {} перед перемещением: {}", handle, e);
                None
            }
        };
        // В событии `new` sway рабочего стола нет, берём из свежего снимка
        let record = |outcome| {
            let mut record = record(outcome);
            record.source_workspace = record.source_workspace.or(observed_workspace);
            record
        };

        let command = move_command(handle, target.workspace);
        let issued_at = Instant::now();
        let queue_delay = issued_at.saturating_duration_since(event.received_at);

        if let Err(error) = self.send(&command).await {
            warn!("Команда '{}' отклонена: {}", command, error);
            let mut rejected = record(AssignmentOutcome::CommandRejected).with_error(error);
            rejected.queue_delay_ms = Some(queue_delay.as_millis() as u64);
            return rejected;
        }

        let mut result = match self.confirm(handle, target.workspace, issued_at).await {
            Confirmation::Confirmed(latency) => {
                info!(
                    "{} -> рабочий стол {} за {}ms (уровень {})",
                    handle,
                    target.workspace,
                    latency.as_millis(),
                    target.tier
                );
                if self.focus_after_move {
                    self.focus(target.workspace).await;
                }
                record(AssignmentOutcome::Confirmed).with_latency(latency)
            }
            Confirmation::Vanished => {
                debug!("Окно {} исчезло до подтверждения", handle);
                record(AssignmentOutcome::WindowVanished)
            }
            Confirmation::TimedOut => {
                warn!(
                    "{} не появилось на рабочем столе {} за {}ms",
                    handle,
                    target.workspace,
                    self.confirm_timeout.as_millis()
                );
                record(AssignmentOutcome::ConfirmationTimeout)
                    .with_latency(self.confirm_timeout)
                    .with_error(format!(
                        "not observed on workspace {} within {}ms",
                        target.workspace,
                        self.confirm_timeout.as_millis()
                    ))
            }
        };
        result.queue_delay_ms = Some(queue_delay.as_millis() as u64);
        result
    }

    /// Отправить команду; `Err` несёт текст ошибки от пира
    async fn send(&self, command: &str) -> std::result::Result<(), String> {
        let replies = self.window_manager.run_command(command).await.map_err(|e| e.to_string())?;
        match replies.iter().find(|reply| !reply.success) {
            Some(failed) => Err(failed
                .error
                .clone()
                .unwrap_or_else(|| "command failed".to_string())),
            None if replies.is_empty() => Err("empty reply".to_string()),
            None => Ok(()),
        }
    }

    async fn confirm(&self, handle: WindowHandle, workspace: u32, issued_at: Instant) -> Confirmation {
        loop {
            let elapsed = issued_at.elapsed();
            if elapsed >= self.confirm_timeout {
                return Confirmation::TimedOut;
            }
            sleep(self.poll_interval.min(self.confirm_timeout - elapsed)).await;

            match self.window_manager.get_window(handle).await {
                Ok(Some(window)) if window.workspace == Some(workspace) => {
                    return Confirmation::Confirmed(issued_at.elapsed());
                }
                Ok(Some(_)) => {}
                Ok(None) => return Confirmation::Vanished,
                // Сбой одного опроса не прерывает ожидание
                Err(e) => debug!("Опрос окна {} не удался: {}", handle, e),
            }
        }
    }

    async fn focus(&self, workspace: u32) {
        let command = format!("workspace number {}", workspace);
        if let Err(error) = self.send(&command).await {
            warn!("Не удалось переключиться на рабочий стол {}: {}", workspace, error);
        }
    }
}

pub fn move_command(handle: WindowHandle, workspace: u32) -> String {
    format!("[{}] move container to workspace number {}", handle, workspace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassMatchKind, Config};
    use crate::events::WindowInfo;
    use crate::services::resolver::ResolutionTier;
    use crate::services::window_manager::{CommandBehavior, DryRunWindowManager};

    fn engine() -> EngineConfig {
        EngineConfig {
            min_workspace: 1,
            max_workspace: 70,
            confirm_poll_interval_ms: 50,
            confirm_timeout_ms: 1000,
            focus_after_move: false,
            ..Config::default().engine
        }
    }

    async fn setup(config: EngineConfig) -> (AssignmentExecutor, Arc<DryRunWindowManager>, WindowCreationEvent) {
        let wm = Arc::new(DryRunWindowManager::new());
        let window = WindowInfo::new(7).with_app_id("firefox").with_workspace(1);
        wm.create_window(window.clone()).await;
        let executor = AssignmentExecutor::new(wm.clone(), &config);
        (executor, wm, WindowCreationEvent::new(window))
    }

    fn target(workspace: u32) -> Target {
        Target {
            workspace,
            tier: ResolutionTier::ClassMatch(ClassMatchKind::Exact),
        }
    }

    #[test]
    fn move_command_addresses_window_by_handle() {
        assert_eq!(
            move_command(WindowHandle(94), 3),
            "[con_id=94] move container to workspace number 3"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_move() {
        let (executor, wm, event) = setup(engine()).await;

        let record = executor.execute(&event, &target(3), false).await;

        assert_eq!(record.outcome, AssignmentOutcome::Confirmed);
        assert!(record.success);
        assert_eq!(record.target_workspace, Some(3));
        assert_eq!(record.source_workspace, Some(1));
        assert!(record.latency_ms.unwrap() <= 50);
        assert_eq!(wm.window(WindowHandle(7)).unwrap().workspace, Some(3));
        assert_eq!(wm.commands(), vec!["[con_id=7] move container to workspace number 3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn source_workspace_comes_from_fresh_snapshot() {
        let (executor, _wm, _) = setup(engine()).await;
        // Как в событии sway: контейнер без рабочего стола
        let event = WindowCreationEvent::new(WindowInfo::new(7).with_app_id("firefox"));

        let record = executor.execute(&event, &target(3), false).await;

        assert_eq!(record.outcome, AssignmentOutcome::Confirmed);
        assert_eq!(record.source_workspace, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_target_sends_nothing() {
        let (executor, wm, event) = setup(engine()).await;

        let record = executor.execute(&event, &target(71), false).await;

        assert_eq!(record.outcome, AssignmentOutcome::InvalidTargetWorkspace);
        assert!(!record.success);
        assert!(record.error.is_some());
        assert!(wm.commands().is_empty());

        let record = executor.execute(&event, &target(0), false).await;
        assert_eq!(record.outcome, AssignmentOutcome::InvalidTargetWorkspace);
        assert!(wm.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn range_bounds_are_inclusive() {
        let (executor, _wm, event) = setup(engine()).await;
        assert_eq!(
            executor.execute(&event, &target(70), false).await.outcome,
            AssignmentOutcome::Confirmed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_command_carries_peer_error() {
        let (executor, wm, event) = setup(engine()).await;
        wm.set_behavior(CommandBehavior::Reject("No matching node".into()));

        let record = executor.execute(&event, &target(3), true).await;

        assert_eq!(record.outcome, AssignmentOutcome::CommandRejected);
        assert_eq!(record.error.as_deref(), Some("No matching node"));
        assert!(record.launch_notification_used);
        assert_eq!(wm.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_command_times_out_after_configured_interval() {
        let (executor, wm, event) = setup(engine()).await;
        wm.set_behavior(CommandBehavior::Ignore);
        let started = Instant::now();

        let record = executor.execute(&event, &target(3), false).await;

        assert_eq!(record.outcome, AssignmentOutcome::ConfirmationTimeout);
        assert!(!record.success);
        assert_eq!(record.latency_ms, Some(1000));
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(1000) && waited < Duration::from_millis(1100));
        // Одна команда, без повторов
        assert_eq!(wm.commands().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn window_already_on_target_needs_no_command() {
        let (executor, wm, event) = setup(engine()).await;

        let record = executor.execute(&event, &target(1), false).await;

        assert_eq!(record.outcome, AssignmentOutcome::AlreadyOnTarget);
        assert!(record.success);
        assert!(wm.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_window_is_not_a_failure_of_the_peer() {
        let (executor, wm, event) = setup(engine()).await;
        wm.remove_window(WindowHandle(7));

        let record = executor.execute(&event, &target(3), false).await;

        assert_eq!(record.outcome, AssignmentOutcome::WindowVanished);
        assert!(wm.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn focus_follows_confirmed_move_when_enabled() {
        let config = EngineConfig {
            focus_after_move: true,
            ..engine()
        };
        let (executor, wm, event) = setup(config).await;

        executor.execute(&event, &target(5), false).await;

        assert_eq!(
            wm.commands(),
            vec![
                "[con_id=7] move container to workspace number 5".to_string(),
                "workspace number 5".to_string(),
            ]
        );
    }
}
