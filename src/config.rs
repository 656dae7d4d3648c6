use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::events::{EventCategory, WindowInfo};

pub const SUPPORTED_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub logging: LoggingConfig,
    pub engine: EngineConfig,
    pub subscriptions: SubscriptionConfig,
    pub ipc: IpcConfig,
    pub process: ProcessConfig,
    #[serde(default)]
    pub rules: Vec<AssignmentRule>,
    #[serde(default)]
    pub applications: Vec<NamedApplication>,
    #[serde(default)]
    pub title_hints: Vec<TitleHint>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub min_workspace: u32,
    pub max_workspace: u32,
    pub launch_ttl_ms: u64,
    pub property_retry_delay_ms: u64,
    pub confirm_poll_interval_ms: u64,
    pub confirm_timeout_ms: u64,
    pub focus_after_move: bool,
    pub history_capacity: usize,
    pub gap_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    pub health_interval_ms: u64,
    pub stale_multiplier: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_reconnect_attempts: u32,
    pub categories: Vec<EventCategory>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpcConfig {
    /// Сокет для уведомлений о запуске и диагностических запросов
    pub socket_path: Option<PathBuf>,
    /// Сокет sway/i3; по умолчанию берётся из SWAYSOCK/I3SOCK
    pub wm_socket: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessConfig {
    pub workspace_var: String,
    pub app_name_var: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    Exact,
    Prefix,
    Pattern,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignmentRule {
    pub app_id: String,
    #[serde(rename = "match", default = "default_match")]
    pub strategy: MatchStrategy,
    pub workspace: u32,
    #[serde(default)]
    pub priority: i32,
    /// Вторичный идентификатор (X11 instance) для уточнения правила
    #[serde(default)]
    pub instance: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamedApplication {
    pub name: String,
    pub workspace: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TitleHint {
    pub class: String,
    /// Регулярное выражение; первая группа захвата - номер рабочего стола
    pub pattern: String,
}

fn default_schema_version() -> u32 {
    SUPPORTED_SCHEMA_VERSION
}

fn default_match() -> MatchStrategy {
    MatchStrategy::Exact
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: SUPPORTED_SCHEMA_VERSION,
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            engine: EngineConfig {
                min_workspace: 1,
                max_workspace: 70,
                launch_ttl_ms: 5000,
                property_retry_delay_ms: 100,
                confirm_poll_interval_ms: 50,
                confirm_timeout_ms: 1000,
                focus_after_move: false,
                history_capacity: 500,
                gap_capacity: 200,
            },
            subscriptions: SubscriptionConfig {
                health_interval_ms: 30_000,
                stale_multiplier: 3,
                backoff_base_ms: 1000,
                backoff_max_ms: 30_000,
                max_reconnect_attempts: 5,
                categories: EventCategory::ALL.to_vec(),
            },
            ipc: IpcConfig {
                socket_path: None,
                wm_socket: None,
            },
            process: ProcessConfig {
                workspace_var: "WSPLACE_TARGET_WORKSPACE".to_string(),
                app_name_var: "WSPLACE_APP_NAME".to_string(),
            },
            rules: Vec::new(),
            applications: Vec::new(),
            title_hints: Vec::new(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("WSPLACE_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            anyhow::bail!(
                "Неподдерживаемая версия схемы: {} (ожидается {})",
                self.schema_version,
                SUPPORTED_SCHEMA_VERSION
            );
        }

        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        let engine = &self.engine;
        if engine.min_workspace == 0 || engine.min_workspace > engine.max_workspace {
            anyhow::bail!(
                "Неверный диапазон рабочих столов: {}..={}",
                engine.min_workspace,
                engine.max_workspace
            );
        }
        if engine.confirm_poll_interval_ms == 0 || engine.confirm_timeout_ms == 0 {
            anyhow::bail!("confirm_poll_interval_ms и confirm_timeout_ms должны быть больше 0");
        }
        if engine.launch_ttl_ms == 0 {
            anyhow::bail!("launch_ttl_ms должно быть больше 0");
        }
        if engine.history_capacity == 0 || engine.gap_capacity == 0 {
            anyhow::bail!("Ёмкость истории должна быть больше 0");
        }

        let subs = &self.subscriptions;
        if subs.health_interval_ms == 0 || subs.stale_multiplier == 0 || subs.backoff_base_ms == 0 {
            anyhow::bail!("Интервалы проверки подписок должны быть больше 0");
        }
        if !subs.categories.contains(&EventCategory::Window) {
            anyhow::bail!("Подписка на события окон обязательна");
        }

        if self.process.workspace_var.is_empty() || self.process.app_name_var.is_empty() {
            anyhow::bail!("Имена переменных окружения процесса не могут быть пустыми");
        }

        // Валидация правил: цели за пределами диапазона - ошибка оператора,
        // но ловим её здесь, чтобы не дойти до отказа при назначении
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.app_id.is_empty() {
                anyhow::bail!("Пустой app_id в правиле #{}", i + 1);
            }
            self.check_workspace(rule.workspace)
                .with_context(|| format!("Правило #{} ({})", i + 1, rule.app_id))?;
            if rule.strategy == MatchStrategy::Pattern {
                Regex::new(&rule.app_id)
                    .with_context(|| format!("Неверный шаблон в правиле #{}", i + 1))?;
            }
        }

        for app in &self.applications {
            if app.name.is_empty() {
                anyhow::bail!("Пустое имя приложения в реестре");
            }
            self.check_workspace(app.workspace)
                .with_context(|| format!("Приложение '{}'", app.name))?;
        }

        for hint in &self.title_hints {
            let re = Regex::new(&hint.pattern)
                .with_context(|| format!("Неверный шаблон заголовка для '{}'", hint.class))?;
            if re.captures_len() < 2 {
                anyhow::bail!("Шаблон заголовка для '{}' не содержит группы захвата", hint.class);
            }
        }

        Ok(())
    }

    fn check_workspace(&self, workspace: u32) -> Result<()> {
        if !self.workspace_in_range(workspace) {
            anyhow::bail!(
                "Рабочий стол {} вне диапазона {}..={}",
                workspace,
                self.engine.min_workspace,
                self.engine.max_workspace
            );
        }
        Ok(())
    }

    pub fn workspace_in_range(&self, workspace: u32) -> bool {
        (self.engine.min_workspace..=self.engine.max_workspace).contains(&workspace)
    }

    pub fn launch_ttl(&self) -> Duration {
        Duration::from_millis(self.engine.launch_ttl_ms)
    }

    /// Путь сокета уведомлений: из конфигурации или $XDG_RUNTIME_DIR/wsplace.sock
    pub fn socket_path(&self) -> PathBuf {
        if let Some(path) = &self.ipc.socket_path {
            return path.clone();
        }
        let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(runtime_dir).join("wsplace.sock")
    }
}

/// Которое из подправил классового сопоставления сработало
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassMatchKind {
    Exact,
    Secondary,
    Normalized,
}

#[derive(Debug, Clone)]
struct IndexedRule {
    rule: AssignmentRule,
    pattern: Option<Regex>,
    normalized: String,
}

impl IndexedRule {
    fn matches_identifier(&self, identifier: &str) -> bool {
        match self.rule.strategy {
            MatchStrategy::Exact => self.rule.app_id == identifier,
            MatchStrategy::Prefix => identifier.starts_with(&self.rule.app_id),
            MatchStrategy::Pattern => self
                .pattern
                .as_ref()
                .is_some_and(|re| re.is_match(identifier)),
        }
    }
}

static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));

/// Нормализация класса: нижний регистр, последний сегмент reverse-DNS
/// (`org.gnome.Nautilus` -> `nautilus`), без разделителей.
pub fn normalize_class(raw: &str) -> String {
    let lower = raw.trim().to_lowercase();
    let tail = lower.rsplit('.').next().unwrap_or(&lower);
    NON_ALNUM.replace_all(tail, "").into_owned()
}

/// Неизменяемая таблица правил назначения.
///
/// Строится один раз из [`Config`]; горячая перезагрузка заменяет таблицу целиком.
#[derive(Debug, Clone, Default)]
pub struct AssignmentConfiguration {
    // Отсортированы по убыванию приоритета, при равенстве - порядок в файле
    rules: Vec<IndexedRule>,
    applications: HashMap<String, u32>,
}

impl AssignmentConfiguration {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.rules, &config.applications)
    }

    pub fn new(rules: &[AssignmentRule], applications: &[NamedApplication]) -> Result<Self> {
        let mut indexed = rules
            .iter()
            .map(|rule| {
                let pattern = match rule.strategy {
                    MatchStrategy::Pattern => Some(
                        Regex::new(&rule.app_id)
                            .with_context(|| format!("Неверный шаблон правила '{}'", rule.app_id))?,
                    ),
                    _ => None,
                };
                Ok(IndexedRule {
                    normalized: normalize_class(&rule.app_id),
                    rule: rule.clone(),
                    pattern,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // sort_by_key стабилен: порядок в файле сохраняется при равном приоритете
        indexed.sort_by_key(|r| std::cmp::Reverse(r.rule.priority));

        let applications = applications
            .iter()
            .map(|app| (app.name.to_lowercase(), app.workspace))
            .collect();

        Ok(Self {
            rules: indexed,
            applications,
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Поиск в реестре именованных приложений (регистр не важен)
    pub fn application_workspace(&self, name: &str) -> Option<u32> {
        self.applications.get(&name.to_lowercase()).copied()
    }

    /// Классовое сопоставление: точное → вторичный идентификатор → нормализованный класс
    pub fn match_window(&self, window: &WindowInfo) -> Option<(u32, ClassMatchKind)> {
        let identifier = window.identifier();

        if let Some(id) = identifier {
            let exact = self.rules.iter().find(|r| {
                r.matches_identifier(id)
                    && r.rule
                        .instance
                        .as_deref()
                        .map_or(true, |inst| window.instance.as_deref() == Some(inst))
            });
            if let Some(r) = exact {
                return Some((r.rule.workspace, ClassMatchKind::Exact));
            }
        }

        // Вторичные идентификаторы: class, когда первичным был app_id, и instance
        let secondary: Vec<&str> = [
            window.class.as_deref().filter(|c| Some(*c) != identifier),
            window.instance.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();

        for candidate in &secondary {
            if let Some(r) = self
                .rules
                .iter()
                .find(|r| r.matches_identifier(candidate) && r.rule.instance.is_none())
            {
                return Some((r.rule.workspace, ClassMatchKind::Secondary));
            }
        }

        let normalized: Vec<String> = identifier
            .into_iter()
            .chain(secondary)
            .map(normalize_class)
            .filter(|n| !n.is_empty())
            .collect();

        self.rules
            .iter()
            .filter(|r| r.rule.strategy != MatchStrategy::Pattern && r.rule.instance.is_none())
            .find(|r| normalized.iter().any(|n| *n == r.normalized))
            .map(|r| (r.rule.workspace, ClassMatchKind::Normalized))
    }
}
