//! Каскад разрешения цели для нового окна.
//!
//! Каждый уровень - отдельная реализация [`Resolver`], каскад хранит их в
//! фиксированном порядке и возвращает первый результат. Уровни:
//!
//! 1. рабочий стол из уведомления о запуске;
//! 2. обработчики конкретных приложений ([`AppHandler`]);
//! 3. переопределение из окружения процесса;
//! 4. реестр именованных приложений;
//! 5. сопоставление класса по таблице правил (точное, вторичное, нормализованное).
//!
//! Разрешение не обращается к оконному менеджеру: всё нужное лежит в снимке
//! окна и в [`ResolutionContext`].

mod app_handler;
mod tiers;

pub use app_handler::{AppHandler, TitleHintHandler};
pub use tiers::{
    AppHandlerResolver, ClassMatchResolver, LaunchNotificationResolver, NamedApplicationResolver,
    ProcessOverrideResolver,
};

use crate::config::{AssignmentConfiguration, ClassMatchKind, Config};
use crate::events::WindowCreationEvent;
use crate::services::launch_registry::LaunchNotificationRegistry;
use crate::utils::ProcessHints;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Уровень каскада, выдавший цель
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionTier {
    LaunchNotification,
    AppHandler,
    ProcessOverride,
    NamedApplication,
    ClassMatch(ClassMatchKind),
}

impl ResolutionTier {
    /// Короткая метка для логов и диагностики: "1", "2", ... "5a"/"5b"/"5c"
    pub fn label(&self) -> &'static str {
        match self {
            ResolutionTier::LaunchNotification => "1-launch",
            ResolutionTier::AppHandler => "2-app-handler",
            ResolutionTier::ProcessOverride => "3-process-override",
            ResolutionTier::NamedApplication => "4-named-app",
            ResolutionTier::ClassMatch(ClassMatchKind::Exact) => "5a-class-exact",
            ResolutionTier::ClassMatch(ClassMatchKind::Secondary) => "5b-class-secondary",
            ResolutionTier::ClassMatch(ClassMatchKind::Normalized) => "5c-class-normalized",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Найденная цель
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub workspace: u32,
    pub tier: ResolutionTier,
}

/// Сведения о сопоставленном уведомлении о запуске
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub notification_id: String,
    pub app_name: String,
    pub confidence: f32,
    pub workspace: Option<u32>,
}

/// Всё, что видят уровни каскада при разрешении одного окна
pub struct ResolutionContext<'a> {
    pub registry: &'a mut LaunchNotificationRegistry,
    pub configuration: &'a AssignmentConfiguration,
    pub process: &'a ProcessHints,
    pub now: Instant,
    /// Заполняется уровнем 1, даже если уведомление не несёт рабочего стола
    pub correlation: Option<Correlation>,
}

impl<'a> ResolutionContext<'a> {
    pub fn new(
        registry: &'a mut LaunchNotificationRegistry,
        configuration: &'a AssignmentConfiguration,
        process: &'a ProcessHints,
        now: Instant,
    ) -> Self {
        Self {
            registry,
            configuration,
            process,
            now,
            correlation: None,
        }
    }
}

pub trait Resolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn try_resolve(&self, snapshot: &WindowCreationEvent, ctx: &mut ResolutionContext<'_>) -> Option<Target>;
}

/// Упорядоченный список уровней; первый сработавший выигрывает
pub struct Cascade {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl Cascade {
    pub fn new(resolvers: Vec<Box<dyn Resolver>>) -> Self {
        Self { resolvers }
    }

    /// Стандартный порядок уровней с обработчиками из конфигурации
    pub fn standard(app_handlers: Vec<Box<dyn AppHandler>>) -> Self {
        Self::new(vec![
            Box::new(LaunchNotificationResolver),
            Box::new(AppHandlerResolver::new(app_handlers)),
            Box::new(ProcessOverrideResolver),
            Box::new(NamedApplicationResolver),
            Box::new(ClassMatchResolver),
        ])
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let handlers = config
            .title_hints
            .iter()
            .map(|hint| TitleHintHandler::new(&hint.class, &hint.pattern).map(|h| Box::new(h) as Box<dyn AppHandler>))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self::standard(handlers))
    }

    pub fn tiers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.resolvers.iter().map(|r| r.name())
    }

    /// `None` - ни один уровень не подошёл, окно остаётся на месте
    pub fn resolve(&self, snapshot: &WindowCreationEvent, ctx: &mut ResolutionContext<'_>) -> Option<Target> {
        self.resolvers
            .iter()
            .find_map(|resolver| resolver.try_resolve(snapshot, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssignmentRule, MatchStrategy, NamedApplication};
    use crate::events::{LaunchRequest, WindowInfo, WindowSignature};
    use tokio::time::Duration;

    fn configuration() -> AssignmentConfiguration {
        AssignmentConfiguration::new(
            &[AssignmentRule {
                app_id: "firefox".into(),
                strategy: MatchStrategy::Exact,
                workspace: 7,
                priority: 0,
                instance: None,
            }],
            &[NamedApplication {
                name: "browser".into(),
                workspace: 2,
            }],
        )
        .unwrap()
    }

    fn launch(id: &str, workspace: Option<u32>) -> LaunchRequest {
        LaunchRequest {
            id: id.into(),
            app_name: "firefox".into(),
            session: None,
            signature: WindowSignature {
                app_id: Some("firefox".into()),
                ..Default::default()
            },
            workspace,
            launch_workspace: None,
            timestamp_ms: None,
            ttl_ms: None,
        }
    }

    fn snapshot() -> WindowCreationEvent {
        WindowCreationEvent::new(WindowInfo::new(10).with_app_id("firefox").with_title("New Tab").with_pid(50))
    }

    #[tokio::test(start_paused = true)]
    async fn launch_notification_beats_every_lower_tier() {
        let table = configuration();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        registry.register(launch("n1", Some(4))).unwrap();
        let hints = ProcessHints {
            workspace: Some("3".into()),
            app_name: Some("browser".into()),
        };

        let cascade = Cascade::standard(vec![]);
        let mut ctx = ResolutionContext::new(&mut registry, &table, &hints, Instant::now());
        let target = cascade.resolve(&snapshot(), &mut ctx).unwrap();

        assert_eq!(target.tier, ResolutionTier::LaunchNotification);
        assert_eq!(target.workspace, 4);
        assert_eq!(ctx.correlation.as_ref().unwrap().notification_id, "n1");
    }

    #[tokio::test(start_paused = true)]
    async fn notification_without_workspace_falls_through_but_is_recorded() {
        let table = configuration();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        registry.register(launch("n1", None)).unwrap();
        let hints = ProcessHints::default();

        let cascade = Cascade::standard(vec![]);
        let mut ctx = ResolutionContext::new(&mut registry, &table, &hints, Instant::now());
        let target = cascade.resolve(&snapshot(), &mut ctx).unwrap();

        assert_eq!(target.tier, ResolutionTier::ClassMatch(ClassMatchKind::Exact));
        assert_eq!(target.workspace, 7);
        assert!(ctx.correlation.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn tiers_are_tried_in_order() {
        let table = configuration();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        let cascade = Cascade::standard(vec![]);
        let window = snapshot();

        let override_hints = ProcessHints {
            workspace: Some("3".into()),
            app_name: Some("browser".into()),
        };
        let mut ctx = ResolutionContext::new(&mut registry, &table, &override_hints, Instant::now());
        assert_eq!(
            cascade.resolve(&window, &mut ctx),
            Some(Target { workspace: 3, tier: ResolutionTier::ProcessOverride })
        );

        let named_hints = ProcessHints {
            workspace: None,
            app_name: Some("browser".into()),
        };
        let mut ctx = ResolutionContext::new(&mut registry, &table, &named_hints, Instant::now());
        assert_eq!(
            cascade.resolve(&window, &mut ctx),
            Some(Target { workspace: 2, tier: ResolutionTier::NamedApplication })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_window_is_no_match() {
        let table = configuration();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        let hints = ProcessHints::default();
        let cascade = Cascade::standard(vec![]);
        let window = WindowCreationEvent::new(WindowInfo::new(11).with_app_id("mystery"));

        let mut ctx = ResolutionContext::new(&mut registry, &table, &hints, Instant::now());
        assert_eq!(cascade.resolve(&window, &mut ctx), None);
        assert!(ctx.correlation.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_is_idempotent_for_identical_inputs() {
        let table = configuration();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        registry.register(launch("n1", Some(4))).unwrap();
        let mut twin = registry.clone();
        let hints = ProcessHints::default();
        let cascade = Cascade::standard(vec![]);
        let window = snapshot();
        let now = Instant::now();

        let first = cascade.resolve(&window, &mut ResolutionContext::new(&mut registry, &table, &hints, now));
        let second = cascade.resolve(&window, &mut ResolutionContext::new(&mut twin, &table, &hints, now));
        assert_eq!(first, second);
    }

    #[test]
    fn standard_cascade_order() {
        let cascade = Cascade::standard(vec![]);
        assert_eq!(
            cascade.tiers().collect::<Vec<_>>(),
            vec!["launch-notification", "app-handler", "process-override", "named-application", "class-match"]
        );
    }
}
