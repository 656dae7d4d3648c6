pub mod proc_env;
pub mod ring_buffer;

pub use proc_env::{ProcEnvReader, ProcessEnvSource, ProcessHints, StaticProcessEnv};
pub use ring_buffer::RingBuffer;

use std::time::{SystemTime, UNIX_EPOCH};

/// Настенное время в миллисекундах, только для отображения в диагностике
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ✅ Макросы условного логирования для оптимизации производительности
#[macro_export]
macro_rules! debug_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! trace_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::TRACE) {
            tracing::trace!($($arg)*);
        }
    };
}
