use crate::config::Config;
use crate::error::Result;
use crate::events::{EngineMessage, EventCategory, WindowHandle, WindowInfo};
use smallvec::SmallVec;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Ответ оконного менеджера на одну команду
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReply {
    pub success: bool,
    pub error: Option<String>,
}

impl CommandReply {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Почти всегда одна команда - один ответ
pub type CommandReplies = SmallVec<[CommandReply; 1]>;

/// Фоновая задача, пересылающая события одной подписки. Прерывается при drop.
#[derive(Debug, Default)]
pub struct SubscriptionTask(Option<JoinHandle<()>>);

impl SubscriptionTask {
    pub fn spawned(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    /// Подписка без собственной задачи (события доставляются напрямую)
    pub fn detached() -> Self {
        Self(None)
    }
}

impl Drop for SubscriptionTask {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}

/// IPC-пир: подписка на события, запрос состояния и выполнение команд
#[async_trait::async_trait]
pub trait WindowManager: Send + Sync {
    /// Установить подписку на категорию. Возвращается после подтверждения от пира;
    /// события идут в `sink` с меткой `generation`, закрытие потока тоже сообщается в `sink`.
    async fn subscribe(
        &self,
        category: EventCategory,
        generation: u64,
        sink: mpsc::Sender<EngineMessage>,
    ) -> Result<SubscriptionTask>;

    /// Свежий снимок окна из дерева; `None`, если окна больше нет
    async fn get_window(&self, handle: WindowHandle) -> Result<Option<WindowInfo>>;

    async fn run_command(&self, command: &str) -> Result<CommandReplies>;
}

/// Factory function to create an appropriate window manager based on the dry_run flag
pub fn create_window_manager(config: &Config, dry_run: bool) -> Result<Arc<dyn WindowManager>> {
    if dry_run {
        let manager = Arc::new(super::dry_run::DryRunWindowManager::new());
        manager.clone().spawn_demo_traffic(config.engine.min_workspace, config.engine.max_workspace);
        Ok(manager)
    } else {
        Ok(Arc::new(super::sway::SwayWindowManager::new(
            config.ipc.wm_socket.clone(),
        )?))
    }
}
