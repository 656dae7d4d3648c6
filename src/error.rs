use crate::events::EventCategory;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlacerError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ошибка IPC оконного менеджера: {0}")]
    Ipc(String),

    #[error("Подписка {category} не восстановлена после {attempts} попыток")]
    SubscriptionFailure {
        category: EventCategory,
        attempts: u32,
    },

    #[error("Уведомление о запуске уже зарегистрировано: {0}")]
    DuplicateNotification(String),

    #[error("Неверная сигнатура окна: {0}")]
    InvalidSignature(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),
}

impl PlacerError {
    /// Фатальна ли ошибка для процесса (всё остальное только пишется в историю)
    pub fn is_fatal(&self) -> bool {
        matches!(self, PlacerError::SubscriptionFailure { .. })
    }
}

pub type Result<T> = std::result::Result<T, PlacerError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! placer_error {
    (ipc, $($arg:tt)*) => {
        $crate::error::PlacerError::Ipc(format!($($arg)*))
    };
    (invalid_signature, $($arg:tt)*) => {
        $crate::error::PlacerError::InvalidSignature(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::PlacerError::ServiceUnavailable(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_subscription_failure_is_fatal() {
        let fatal = PlacerError::SubscriptionFailure {
            category: EventCategory::Window,
            attempts: 5,
        };
        assert!(fatal.is_fatal());
        assert!(!placer_error!(ipc, "broken pipe").is_fatal());
        assert!(!PlacerError::DuplicateNotification("x".into()).is_fatal());
    }
}
