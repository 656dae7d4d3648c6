use super::r#trait::{CommandReplies, CommandReply, SubscriptionTask, WindowManager};
use crate::error::{PlacerError, Result};
use crate::events::{EngineMessage, EventCategory, PeerEvent, WindowEventType, WindowHandle, WindowInfo};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use smallvec::smallvec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::info;

static MOVE_COMMAND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[con_id=(\d+)\]\s+move\s+(?:container\s+)?to\s+workspace\s+number\s+(\d+)$")
        .expect("static regex")
});
static FOCUS_COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^workspace\s+number\s+(\d+)$").expect("static regex"));

/// Как эмулятор реагирует на команды перемещения
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBehavior {
    /// Принять и применить
    Apply,
    /// Явно отклонить с текстом ошибки
    Reject(String),
    /// Принять, но ничего не делать (окно "игнорирует" команду)
    Ignore,
}

/// Эмуляция оконного менеджера в памяти: режим `--dry-run` и тесты
pub struct DryRunWindowManager {
    windows: DashMap<WindowHandle, WindowInfo>,
    sinks: Mutex<HashMap<EventCategory, (u64, mpsc::Sender<EngineMessage>)>>,
    commands: Mutex<Vec<String>>,
    behavior: Mutex<CommandBehavior>,
    subscribe_failures: Mutex<HashMap<EventCategory, u32>>,
    next_handle: AtomicU64,
}

impl Default for DryRunWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunWindowManager {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
            sinks: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            behavior: Mutex::new(CommandBehavior::Apply),
            subscribe_failures: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(100),
        }
    }

    pub fn set_behavior(&self, behavior: CommandBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Следующие `times` попыток подписаться на категорию завершатся ошибкой
    pub fn fail_subscriptions(&self, category: EventCategory, times: u32) {
        self.subscribe_failures.lock().insert(category, times);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn window(&self, handle: WindowHandle) -> Option<WindowInfo> {
        self.windows.get(&handle).map(|w| w.clone())
    }

    /// Изменить окно без события (например, toolkit заполнил app_id позже)
    pub fn update_window(&self, handle: WindowHandle, update: impl FnOnce(&mut WindowInfo)) {
        if let Some(mut window) = self.windows.get_mut(&handle) {
            update(window.value_mut());
        }
    }

    pub fn remove_window(&self, handle: WindowHandle) {
        self.windows.remove(&handle);
    }

    pub fn allocate_handle(&self) -> WindowHandle {
        WindowHandle(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Добавить окно в дерево и отправить событие `new`
    pub async fn create_window(&self, window: WindowInfo) {
        self.windows.insert(window.handle, window.clone());
        self.emit(PeerEvent::Window {
            change: WindowEventType::New,
            window,
        })
        .await;
    }

    /// Отправить событие подписчику категории (если подписка есть)
    pub async fn emit(&self, event: PeerEvent) {
        let category = event.category();
        let sink = self.sinks.lock().get(&category).cloned();
        if let Some((generation, sink)) = sink {
            let _ = sink
                .send(EngineMessage::Event {
                    category,
                    generation,
                    event,
                })
                .await;
        }
    }

    /// Сообщить о разрыве подписки, как при падении соединения
    pub async fn drop_subscription(&self, category: EventCategory) {
        let sink = self.sinks.lock().remove(&category);
        if let Some((generation, sink)) = sink {
            let _ = sink
                .send(EngineMessage::SubscriptionClosed {
                    category,
                    generation,
                    reason: "dry-run: соединение закрыто".to_string(),
                })
                .await;
        }
    }

    /// Периодически создаёт фиктивные окна, чтобы в dry-run было что размещать
    pub fn spawn_demo_traffic(self: Arc<Self>, min_workspace: u32, max_workspace: u32) {
        tokio::spawn(async move {
            let apps = ["firefox", "kitty", "code", "slack"];
            let mut index = 0;
            let mut ticker = interval(Duration::from_secs(10));
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let app = apps[index % apps.len()];
                let workspace = min_workspace + (index as u32 % (max_workspace - min_workspace + 1));
                let window = WindowInfo::new(self.allocate_handle().value())
                    .with_app_id(app)
                    .with_title(format!("{} - dry_run", app))
                    .with_workspace(workspace);

                info!("Dry-run: эмулируем новое окно {}", window);
                self.create_window(window).await;
                index += 1;
            }
        });
    }

    fn apply_command(&self, command: &str) -> CommandReply {
        let behavior = self.behavior.lock().clone();

        if let Some(caps) = MOVE_COMMAND.captures(command) {
            let parsed = (caps[1].parse::<u64>(), caps[2].parse::<u32>());
            let (Ok(handle), Ok(workspace)) = parsed else {
                return CommandReply::failed("bad arguments");
            };

            return match behavior {
                CommandBehavior::Reject(error) => CommandReply::failed(error),
                CommandBehavior::Ignore => CommandReply::ok(),
                CommandBehavior::Apply => match self.windows.get_mut(&WindowHandle(handle)) {
                    Some(mut window) => {
                        window.workspace = Some(workspace);
                        CommandReply::ok()
                    }
                    None => CommandReply::failed("No matching node"),
                },
            };
        }

        if FOCUS_COMMAND.is_match(command) {
            return CommandReply::ok();
        }

        CommandReply::failed(format!("Unknown/invalid command '{}'", command))
    }
}

#[async_trait::async_trait]
impl WindowManager for DryRunWindowManager {
    async fn subscribe(
        &self,
        category: EventCategory,
        generation: u64,
        sink: mpsc::Sender<EngineMessage>,
    ) -> Result<SubscriptionTask> {
        {
            let mut failures = self.subscribe_failures.lock();
            if let Some(remaining) = failures.get_mut(&category) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(PlacerError::Ipc(format!("dry-run: подписка {} отклонена", category)));
                }
            }
        }

        self.sinks.lock().insert(category, (generation, sink));
        Ok(SubscriptionTask::detached())
    }

    async fn get_window(&self, handle: WindowHandle) -> Result<Option<WindowInfo>> {
        Ok(self.window(handle))
    }

    async fn run_command(&self, command: &str) -> Result<CommandReplies> {
        self.commands.lock().push(command.to_string());
        let reply = self.apply_command(command);
        info!("[DRY RUN] {} -> {:?}", command, reply);
        Ok(smallvec![reply])
    }
}
