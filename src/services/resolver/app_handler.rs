use crate::config::normalize_class;
use crate::events::WindowInfo;
use anyhow::{Context, Result};
use regex::Regex;

/// Обработчик конкретного приложения, знающий его собственные подсказки размещения
pub trait AppHandler: Send + Sync {
    fn name(&self) -> &str;

    fn workspace_for(&self, window: &WindowInfo) -> Option<u32>;
}

/// Номер рабочего стола, встроенный в заголовок окна (например, `[ws:3] vim`)
pub struct TitleHintHandler {
    name: String,
    class: String,
    pattern: Regex,
}

impl TitleHintHandler {
    pub fn new(class: &str, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("Неверный шаблон заголовка для '{}'", class))?;
        Ok(Self {
            name: format!("title-hint:{}", class),
            class: normalize_class(class),
            pattern,
        })
    }

    fn applies_to(&self, window: &WindowInfo) -> bool {
        [window.app_id.as_deref(), window.class.as_deref()]
            .into_iter()
            .flatten()
            .any(|candidate| normalize_class(candidate) == self.class)
    }
}

impl AppHandler for TitleHintHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn workspace_for(&self, window: &WindowInfo) -> Option<u32> {
        if !self.applies_to(window) {
            return None;
        }
        let caps = self.pattern.captures(window.title())?;
        caps.get(1)?.as_str().trim().parse().ok()
    }
}
