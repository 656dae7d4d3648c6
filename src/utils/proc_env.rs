use std::fs;
use tracing::debug;

/// Подсказки, унаследованные процессом окна от лаунчера через окружение
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessHints {
    /// Явное переопределение рабочего стола для этого запуска
    pub workspace: Option<String>,
    /// Логическое имя приложения для реестра приложений
    pub app_name: Option<String>,
}

/// Источник подсказок процесса. Читается один раз на окно.
pub trait ProcessEnvSource: Send + Sync {
    fn hints(&self, pid: Option<u32>) -> ProcessHints;
}

/// Чтение `/proc/<pid>/environ`
pub struct ProcEnvReader {
    workspace_var: String,
    app_name_var: String,
}

impl ProcEnvReader {
    pub fn new(workspace_var: impl Into<String>, app_name_var: impl Into<String>) -> Self {
        Self {
            workspace_var: workspace_var.into(),
            app_name_var: app_name_var.into(),
        }
    }

    /// Разбор содержимого environ (пары KEY=VALUE, разделённые NUL)
    pub fn parse(&self, environ: &[u8]) -> ProcessHints {
        let mut hints = ProcessHints::default();

        for entry in environ.split(|b| *b == 0) {
            let entry = String::from_utf8_lossy(entry);
            let Some((key, value)) = entry.split_once('=') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            if key == self.workspace_var {
                hints.workspace = Some(value.to_string());
            } else if key == self.app_name_var {
                hints.app_name = Some(value.to_string());
            }
        }

        hints
    }
}

impl ProcessEnvSource for ProcEnvReader {
    fn hints(&self, pid: Option<u32>) -> ProcessHints {
        let Some(pid) = pid.filter(|p| *p > 0) else {
            return ProcessHints::default();
        };

        let path = format!("/proc/{}/environ", pid);
        match fs::read(&path) {
            Ok(environ) => self.parse(&environ),
            Err(e) => {
                // Процесс мог уже завершиться или принадлежать другому пользователю
                debug!("Не удалось прочитать {}: {}", path, e);
                ProcessHints::default()
            }
        }
    }
}

/// Фиксированные подсказки (dry-run и тесты)
#[derive(Debug, Clone, Default)]
pub struct StaticProcessEnv(pub std::collections::HashMap<u32, ProcessHints>);

impl ProcessEnvSource for StaticProcessEnv {
    fn hints(&self, pid: Option<u32>) -> ProcessHints {
        pid.and_then(|p| self.0.get(&p).cloned()).unwrap_or_default()
    }
}
