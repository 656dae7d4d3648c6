pub mod launch;
pub mod window;

pub use launch::{LaunchNotification, LaunchRequest, NotificationState, WindowSignature};
pub use window::{WindowCreationEvent, WindowEventType, WindowHandle, WindowInfo};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Категория подписки на события оконного менеджера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    Window,
    Workspace,
    Output,
    Mode,
    Tick,
}

impl EventCategory {
    pub const ALL: [EventCategory; 5] = [
        EventCategory::Window,
        EventCategory::Workspace,
        EventCategory::Output,
        EventCategory::Mode,
        EventCategory::Tick,
    ];

    /// "Болтливые" категории: молчание дольше окна здоровья подозрительно
    pub fn is_chatty(&self) -> bool {
        matches!(self, EventCategory::Window | EventCategory::Workspace)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Window => "window",
            EventCategory::Workspace => "workspace",
            EventCategory::Output => "output",
            EventCategory::Mode => "mode",
            EventCategory::Tick => "tick",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Событие, полученное от оконного менеджера
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Window {
        change: WindowEventType,
        window: WindowInfo,
    },
    Workspace {
        change: String,
        current: Option<u32>,
    },
    Output {
        change: String,
    },
    Mode {
        change: String,
    },
    Tick {
        first: bool,
        payload: String,
    },
}

impl PeerEvent {
    pub fn category(&self) -> EventCategory {
        match self {
            PeerEvent::Window { .. } => EventCategory::Window,
            PeerEvent::Workspace { .. } => EventCategory::Workspace,
            PeerEvent::Output { .. } => EventCategory::Output,
            PeerEvent::Mode { .. } => EventCategory::Mode,
            PeerEvent::Tick { .. } => EventCategory::Tick,
        }
    }
}

/// Сообщение во входной канал координатора.
///
/// Все подписки пишут в один канал, отложенная перепроверка свойств окна
/// возвращается в тот же канал, поэтому у состояния движка один владелец.
#[derive(Debug, Clone)]
pub enum EngineMessage {
    Event {
        category: EventCategory,
        generation: u64,
        event: PeerEvent,
    },
    SubscriptionClosed {
        category: EventCategory,
        generation: u64,
        reason: String,
    },
    Recheck(WindowCreationEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_event_reports_its_category() {
        let event = PeerEvent::Workspace {
            change: "focus".into(),
            current: Some(3),
        };
        assert_eq!(event.category(), EventCategory::Workspace);
        assert_eq!(
            PeerEvent::Tick { first: true, payload: String::new() }.category(),
            EventCategory::Tick
        );
    }

    #[test]
    fn only_window_and_workspace_are_chatty() {
        let chatty: Vec<_> = EventCategory::ALL.iter().filter(|c| c.is_chatty()).collect();
        assert_eq!(chatty, vec![&EventCategory::Window, &EventCategory::Workspace]);
    }

    #[test]
    fn category_serializes_lowercase() {
        let json = serde_json::to_string(&EventCategory::Output).unwrap();
        assert_eq!(json, "\"output\"");
        assert_eq!(EventCategory::Mode.to_string(), "mode");
    }
}
