use super::{AppHandler, Correlation, ResolutionContext, ResolutionTier, Resolver, Target};
use crate::debug_if_enabled;
use crate::events::WindowCreationEvent;

/// Уровень 1: рабочий стол из уведомления о запуске
pub struct LaunchNotificationResolver;

impl Resolver for LaunchNotificationResolver {
    fn name(&self) -> &'static str {
        "launch-notification"
    }

    fn try_resolve(&self, snapshot: &WindowCreationEvent, ctx: &mut ResolutionContext<'_>) -> Option<Target> {
        let notification = ctx.registry.find_and_consume(&snapshot.window, ctx.now)?;

        ctx.correlation = Some(Correlation {
            notification_id: notification.id.clone(),
            app_name: notification.app_name.clone(),
            confidence: notification.confidence,
            workspace: notification.target_workspace,
        });

        // Без явного рабочего стола уведомление только коррелирует, цель выберут нижние уровни
        notification.target_workspace.map(|workspace| Target {
            workspace,
            tier: ResolutionTier::LaunchNotification,
        })
    }
}

/// Уровень 2: подключаемые обработчики приложений
pub struct AppHandlerResolver {
    handlers: Vec<Box<dyn AppHandler>>,
}

impl AppHandlerResolver {
    pub fn new(handlers: Vec<Box<dyn AppHandler>>) -> Self {
        Self { handlers }
    }
}

impl Resolver for AppHandlerResolver {
    fn name(&self) -> &'static str {
        "app-handler"
    }

    fn try_resolve(&self, snapshot: &WindowCreationEvent, _ctx: &mut ResolutionContext<'_>) -> Option<Target> {
        self.handlers.iter().find_map(|handler| {
            let workspace = handler.workspace_for(&snapshot.window)?;
            debug_if_enabled!("Обработчик {} выбрал рабочий стол {}", handler.name(), workspace);
            Some(Target {
                workspace,
                tier: ResolutionTier::AppHandler,
            })
        })
    }
}

/// Уровень 3: явное переопределение, унаследованное процессом окна
pub struct ProcessOverrideResolver;

impl Resolver for ProcessOverrideResolver {
    fn name(&self) -> &'static str {
        "process-override"
    }

    fn try_resolve(&self, _snapshot: &WindowCreationEvent, ctx: &mut ResolutionContext<'_>) -> Option<Target> {
        let raw = ctx.process.workspace.as_deref()?;
        match raw.trim().parse::<u32>() {
            Ok(workspace) => Some(Target {
                workspace,
                tier: ResolutionTier::ProcessOverride,
            }),
            Err(_) => {
                debug_if_enabled!("Игнорируем нечисловое переопределение рабочего стола: '{}'", raw);
                None
            }
        }
    }
}

/// Уровень 4: логическое имя приложения процесса → реестр приложений
pub struct NamedApplicationResolver;

impl Resolver for NamedApplicationResolver {
    fn name(&self) -> &'static str {
        "named-application"
    }

    fn try_resolve(&self, _snapshot: &WindowCreationEvent, ctx: &mut ResolutionContext<'_>) -> Option<Target> {
        let name = ctx.process.app_name.as_deref()?;
        ctx.configuration.application_workspace(name).map(|workspace| Target {
            workspace,
            tier: ResolutionTier::NamedApplication,
        })
    }
}

/// Уровень 5: классовое сопоставление по таблице правил
pub struct ClassMatchResolver;

impl Resolver for ClassMatchResolver {
    fn name(&self) -> &'static str {
        "class-match"
    }

    fn try_resolve(&self, snapshot: &WindowCreationEvent, ctx: &mut ResolutionContext<'_>) -> Option<Target> {
        ctx.configuration
            .match_window(&snapshot.window)
            .map(|(workspace, kind)| Target {
                workspace,
                tier: ResolutionTier::ClassMatch(kind),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssignmentConfiguration;
    use crate::events::WindowInfo;
    use crate::services::launch_registry::LaunchNotificationRegistry;
    use crate::services::resolver::TitleHintHandler;
    use crate::utils::ProcessHints;
    use tokio::time::{Duration, Instant};

    #[tokio::test(start_paused = true)]
    async fn non_numeric_override_is_ignored() {
        let table = AssignmentConfiguration::default();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        let hints = ProcessHints {
            workspace: Some("chat".into()),
            app_name: None,
        };
        let mut ctx = ResolutionContext::new(&mut registry, &table, &hints, Instant::now());
        let window = WindowCreationEvent::new(WindowInfo::new(1).with_app_id("x"));

        assert_eq!(ProcessOverrideResolver.try_resolve(&window, &mut ctx), None);
    }

    #[tokio::test(start_paused = true)]
    async fn app_handler_tier_uses_first_matching_handler() {
        let table = AssignmentConfiguration::default();
        let mut registry = LaunchNotificationRegistry::new(Duration::from_secs(5));
        let hints = ProcessHints::default();
        let mut ctx = ResolutionContext::new(&mut registry, &table, &hints, Instant::now());

        let resolver = AppHandlerResolver::new(vec![
            Box::new(TitleHintHandler::new("kitty", r"@(\d+)").unwrap()),
            Box::new(TitleHintHandler::new("kitty", r"#(\d+)").unwrap()),
        ]);
        let window = WindowCreationEvent::new(WindowInfo::new(1).with_app_id("kitty").with_title("#5 @9"));

        assert_eq!(
            resolver.try_resolve(&window, &mut ctx),
            Some(Target {
                workspace: 9,
                tier: ResolutionTier::AppHandler
            })
        );
    }
}
