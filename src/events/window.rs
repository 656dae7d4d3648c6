use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Непрозрачный идентификатор окна, назначенный оконным менеджером
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowHandle(pub u64);

impl WindowHandle {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "con_id={}", self.0)
    }
}

/// Информация об окне
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct WindowInfo {
    pub handle: WindowHandle,
    /// Стабильный идентификатор приложения (Wayland app_id)
    pub app_id: Option<String>,
    pub class: Option<String>,
    pub instance: Option<String>,
    pub title: Option<String>,
    pub workspace: Option<u32>,
    pub output: Option<String>,
    pub floating: bool,
    pub pid: Option<u32>,
}

impl WindowInfo {
    pub fn new(handle: u64) -> Self {
        Self {
            handle: WindowHandle(handle),
            ..Self::default()
        }
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_workspace(mut self, workspace: u32) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Идентифицирующее поле: app_id для Wayland, class для XWayland/X11
    pub fn identifier(&self) -> Option<&str> {
        non_empty(&self.app_id).or_else(|| non_empty(&self.class))
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// Заполнены ли свойства, по которым окно можно опознать
    pub fn has_complete_properties(&self) -> bool {
        self.identifier().is_some()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

impl fmt::Display for WindowInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.identifier() {
            Some(id) => write!(f, "{} \"{}\" ({})", self.handle, self.title(), id),
            None => write!(f, "{} \"{}\"", self.handle, self.title()),
        }
    }
}

/// Снимок окна на момент получения события `new`. Не изменяется:
/// перепроверка свойств порождает новый снимок через [`WindowCreationEvent::superseded_by`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowCreationEvent {
    pub window: WindowInfo,
    pub received_at: Instant,
    pub has_complete_properties: bool,
    pub rechecked: bool,
}

impl WindowCreationEvent {
    pub fn new(window: WindowInfo) -> Self {
        Self::received_at(window, Instant::now())
    }

    pub fn received_at(window: WindowInfo, received_at: Instant) -> Self {
        let has_complete_properties = window.has_complete_properties();
        Self {
            window,
            received_at,
            has_complete_properties,
            rechecked: false,
        }
    }

    /// Новый снимок того же окна; время получения исходного события сохраняется
    pub fn superseded_by(&self, fresh: WindowInfo) -> Self {
        let mut next = Self::received_at(fresh, self.received_at);
        next.rechecked = true;
        next
    }

    pub fn handle(&self) -> WindowHandle {
        self.window.handle
    }
}

impl fmt::Display for WindowCreationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}ms ago{})",
            self.window,
            self.received_at.elapsed().as_millis(),
            if self.rechecked { ", rechecked" } else { "" }
        )
    }
}

/// Тип изменения окна (поле `change` в событии i3/sway)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowEventType {
    New,
    Close,
    Focus,
    Title,
    Move,
    Floating,
    FullscreenMode,
    Urgent,
    Mark,
    #[serde(other)]
    Other,
}

impl WindowEventType {
    pub fn parse(change: &str) -> Self {
        match change {
            "new" => Self::New,
            "close" => Self::Close,
            "focus" => Self::Focus,
            "title" => Self::Title,
            "move" => Self::Move,
            "floating" => Self::Floating,
            "fullscreen_mode" => Self::FullscreenMode,
            "urgent" => Self::Urgent,
            "mark" => Self::Mark,
            _ => Self::Other,
        }
    }
}
