//! Координатор движка: единственный владелец всего изменяемого состояния.
//!
//! Все подписки пишут в один канал [`EngineMessage`], туда же возвращается
//! отложенная перепроверка свойств. Управляющие сообщения (уведомления о
//! запуске, диагностические запросы, перезагрузка правил) идут отдельным
//! каналом. Перемещения выполняются фоновыми задачами, их записи
//! возвращаются в цикл через [`JoinSet`], поэтому история пишется только здесь.

use crate::config::{AssignmentConfiguration, Config};
use crate::error::{PlacerError, Result};
use crate::events::{
    EngineMessage, EventCategory, LaunchRequest, PeerEvent, WindowCreationEvent, WindowEventType, WindowHandle,
    WindowInfo,
};
use crate::services::diagnostics::{AssignmentHistory, AssignmentRecord, DiagnosticsQuery, DiagnosticsReport};
use crate::services::executor::AssignmentExecutor;
use crate::services::gap_detector::EventGapDetector;
use crate::services::launch_registry::LaunchNotificationRegistry;
use crate::services::property_retry::{PropertyCompletionRetry, RetryOutcome, RetryStats};
use crate::services::resolver::{Cascade, ResolutionContext};
use crate::services::subscription::{EventSubscription, HealthPolicy, SubscriptionSnapshot};
use crate::services::window_manager::WindowManager;
use crate::trace_if_enabled;
use crate::utils::ProcessEnvSource;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep_until, Duration, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const CONTROL_CHANNEL_CAPACITY: usize = 64;
/// Сколько помнить окно без события `close` (оно могло потеряться при разрыве подписки)
const CLAIM_RETENTION: Duration = Duration::from_secs(600);

/// Сообщения извне цикла
#[derive(Debug)]
pub enum ControlMessage {
    Launch(LaunchRequest),
    Query(DiagnosticsQuery, oneshot::Sender<DiagnosticsReport>),
    /// Заменить таблицу правил целиком
    Reload(Arc<Config>),
}

pub struct EngineCoordinator {
    config: Arc<Config>,
    window_manager: Arc<dyn WindowManager>,
    process_env: Arc<dyn ProcessEnvSource>,
    policy: HealthPolicy,
    subscriptions: BTreeMap<EventCategory, EventSubscription>,
    registry: LaunchNotificationRegistry,
    configuration: AssignmentConfiguration,
    cascade: Cascade,
    retry: PropertyCompletionRetry,
    executor: Arc<AssignmentExecutor>,
    history: AssignmentHistory,
    gaps: EventGapDetector,
    // Окна, уже принятые в обработку: защита от повторного `new`
    claimed: HashMap<WindowHandle, Instant>,
    assignments: JoinSet<AssignmentRecord>,
    health: Interval,
    event_tx: mpsc::Sender<EngineMessage>,
    event_rx: mpsc::Receiver<EngineMessage>,
    control_rx: mpsc::Receiver<ControlMessage>,
}

impl EngineCoordinator {
    pub fn new(
        config: Arc<Config>,
        window_manager: Arc<dyn WindowManager>,
        process_env: Arc<dyn ProcessEnvSource>,
    ) -> Result<(Self, mpsc::Sender<ControlMessage>)> {
        let configuration = AssignmentConfiguration::from_config(&config)?;
        let cascade = Cascade::from_config(&config)?;
        let policy = HealthPolicy::from_config(&config.subscriptions);

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);

        let engine = &config.engine;
        let retry = PropertyCompletionRetry::new(
            Duration::from_millis(engine.property_retry_delay_ms),
            event_tx.clone(),
            window_manager.clone(),
        );
        let executor = Arc::new(AssignmentExecutor::new(window_manager.clone(), engine));

        let mut health = interval(policy.interval);
        health.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Координатор: {} правил, уровни [{}], рабочие столы {}..={}",
            configuration.rule_count(),
            cascade.tiers().collect::<Vec<_>>().join(", "),
            engine.min_workspace,
            engine.max_workspace
        );

        let coordinator = Self {
            registry: LaunchNotificationRegistry::new(config.launch_ttl()),
            history: AssignmentHistory::new(engine.history_capacity),
            gaps: EventGapDetector::new(engine.gap_capacity),
            subscriptions: BTreeMap::new(),
            claimed: HashMap::new(),
            assignments: JoinSet::new(),
            config,
            window_manager,
            process_env,
            policy,
            configuration,
            cascade,
            retry,
            executor,
            health,
            event_tx,
            event_rx,
            control_rx,
        };
        Ok((coordinator, control_tx))
    }

    /// Установить все подписки. Возвращается, только когда каждая категория
    /// живая; до этого движок не считается готовым.
    pub async fn start(&mut self) -> Result<()> {
        let categories = self.config.subscriptions.categories.clone();
        for category in categories {
            self.establish_with_backoff(category).await?;
        }

        info!(
            "✅ Подписки установлены: {}",
            self.subscriptions
                .keys()
                .map(EventCategory::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Главный цикл. Завершается только фатальной ошибкой.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.step().await?;
        }
    }

    /// Одна итерация цикла: обработать ровно один источник
    pub async fn step(&mut self) -> Result<()> {
        let next_reconnect = self.next_reconnect();
        // Заглушка для выключенной ветки: future создаётся, но не опрашивается
        let reconnect_at = next_reconnect.unwrap_or_else(|| Instant::now() + self.policy.backoff_max);

        tokio::select! {
            Some(message) = self.event_rx.recv() => self.handle_message(message).await?,
            Some(control) = self.control_rx.recv() => self.handle_control(control),
            Some(joined) = self.assignments.join_next(), if !self.assignments.is_empty() => match joined {
                Ok(record) => self.record(record),
                Err(e) => error!("Задача назначения завершилась аварийно: {}", e),
            },
            _ = self.health.tick() => self.check_health()?,
            _ = sleep_until(reconnect_at), if next_reconnect.is_some() => self.reconnect_due().await?,
        }
        Ok(())
    }

    fn subscription_mut(&mut self, category: EventCategory) -> &mut EventSubscription {
        self.subscriptions
            .entry(category)
            .or_insert_with(|| EventSubscription::new(category))
    }

    async fn establish(&mut self, category: EventCategory) -> Result<()> {
        let generation = self.subscription_mut(category).next_generation();
        let task = self
            .window_manager
            .subscribe(category, generation, self.event_tx.clone())
            .await?;
        self.subscription_mut(category).mark_established(task, Instant::now());
        debug!("Подписка {} установлена (поколение {})", category, generation);
        Ok(())
    }

    async fn establish_with_backoff(&mut self, category: EventCategory) -> Result<()> {
        loop {
            match self.establish(category).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("Не удалось подписаться на {}: {}", category, e);
                    let at = self.schedule_reconnect(category)?;
                    sleep_until(at).await;
                }
            }
        }
    }

    /// Отметить потерю и назначить попытку; исчерпание попыток фатально
    fn schedule_reconnect(&mut self, category: EventCategory) -> Result<Instant> {
        let policy = self.policy;
        let subscription = self.subscription_mut(category);
        subscription.mark_lost();

        match subscription.schedule_reconnect(&policy, Instant::now()) {
            Some(at) => {
                debug!(
                    "Переподключение {} через {}ms (попытка {}/{})",
                    category,
                    at.saturating_duration_since(Instant::now()).as_millis(),
                    subscription.reconnect_attempts,
                    policy.max_attempts
                );
                Ok(at)
            }
            None => {
                error!(
                    "❌ Подписка {} не восстановлена после {} попыток",
                    category, policy.max_attempts
                );
                Err(PlacerError::SubscriptionFailure {
                    category,
                    attempts: policy.max_attempts,
                })
            }
        }
    }

    fn next_reconnect(&self) -> Option<Instant> {
        self.subscriptions.values().filter_map(EventSubscription::next_attempt_at).min()
    }

    async fn reconnect_due(&mut self) -> Result<()> {
        let now = Instant::now();
        let due: Vec<EventCategory> = self
            .subscriptions
            .values()
            .filter(|s| s.is_due(now))
            .map(|s| s.category)
            .collect();

        for category in due {
            match self.establish(category).await {
                Ok(()) => info!("Подписка {} восстановлена", category),
                Err(e) => {
                    warn!("Переподключение {} не удалось: {}", category, e);
                    self.schedule_reconnect(category)?;
                }
            }
        }
        Ok(())
    }

    fn check_health(&mut self) -> Result<()> {
        let now = Instant::now();
        let policy = self.policy;
        let stale: Vec<EventCategory> = self
            .subscriptions
            .values_mut()
            .filter_map(|s| {
                s.settle(&policy, now);
                s.check_stale(&policy, now).then_some(s.category)
            })
            .collect();

        let before = self.claimed.len();
        self.claimed
            .retain(|_, claimed_at| now.saturating_duration_since(*claimed_at) < CLAIM_RETENTION);
        if self.claimed.len() < before {
            debug!("Забыто {} окон без события close", before - self.claimed.len());
        }

        for category in stale {
            warn!(
                "Подписка {} молчит дольше {}ms, переподключаемся",
                category,
                policy.stale_after().as_millis()
            );
            self.schedule_reconnect(category)?;
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: EngineMessage) -> Result<()> {
        match message {
            EngineMessage::Event {
                category,
                generation,
                event,
            } => {
                if !self.subscription_mut(category).record_event(generation, Instant::now()) {
                    trace_if_enabled!("Событие устаревшей подписки {} ({}) отброшено", category, generation);
                    return Ok(());
                }
                self.handle_event(event);
            }
            EngineMessage::SubscriptionClosed {
                category,
                generation,
                reason,
            } => {
                if generation != self.subscription_mut(category).generation {
                    return Ok(());
                }
                warn!("Подписка {} потеряна: {}", category, reason);
                self.schedule_reconnect(category)?;
            }
            EngineMessage::Recheck(event) => self.handle_recheck(event).await,
        }
        Ok(())
    }

    fn handle_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::Window { change, window } => self.handle_window_event(change, window),
            PeerEvent::Workspace { change, current } => {
                trace_if_enabled!("workspace {} -> {:?}", change, current);
            }
            PeerEvent::Output { change } => debug!("Изменение выходов: {}", change),
            PeerEvent::Mode { change } => trace_if_enabled!("mode {}", change),
            PeerEvent::Tick { first, payload } => trace_if_enabled!("tick first={} {}", first, payload),
        }
    }

    fn handle_window_event(&mut self, change: WindowEventType, window: WindowInfo) {
        let now = Instant::now();
        let handle = window.handle;

        let subscriptions = &self.subscriptions;
        if let Some(gap) = self.gaps.observe(handle, change, now, || {
            subscriptions.values().map(|s| s.snapshot(now)).collect()
        }) {
            info!(
                "Возможно пропущены события окон: {} -> {} (разрыв {})",
                gap.last_seen, gap.next_seen, gap.gap_size
            );
        }

        match change {
            WindowEventType::New => {}
            WindowEventType::Close => {
                self.claimed.remove(&handle);
                return;
            }
            _ => return,
        }

        if self.claimed.contains_key(&handle) {
            debug!("Повторное событие new для {}, пропускаем", handle);
            return;
        }
        self.claimed.insert(handle, now);

        let event = WindowCreationEvent::received_at(window, now);
        if event.has_complete_properties {
            self.resolve_and_execute(event);
        } else {
            self.retry.schedule(event);
        }
    }

    async fn handle_recheck(&mut self, event: WindowCreationEvent) {
        match self.retry.complete(&event).await {
            RetryOutcome::Completed(next) | RetryOutcome::StillIncomplete(next) => self.resolve_and_execute(next),
            RetryOutcome::Vanished => {
                self.claimed.remove(&event.handle());
            }
        }
    }

    /// Разрешить цель и запустить перемещение; подсказки процесса читаются здесь один раз
    fn resolve_and_execute(&mut self, event: WindowCreationEvent) {
        let hints = self.process_env.hints(event.window.pid);
        let mut ctx = ResolutionContext::new(&mut self.registry, &self.configuration, &hints, Instant::now());
        let target = self.cascade.resolve(&event, &mut ctx);
        let correlation = ctx.correlation.take();
        let launch_used = correlation.is_some();

        if let Some(correlation) = &correlation {
            debug!(
                "{} коррелирует с запуском {} ({}, уверенность {:.2})",
                event.handle(),
                correlation.notification_id,
                correlation.app_name,
                correlation.confidence
            );
        }

        let Some(target) = target else {
            info!("Нет правила для {}, окно остаётся на месте", event.window);
            self.record(AssignmentRecord::no_match(&event, launch_used));
            return;
        };

        info!("{} -> рабочий стол {} (уровень {})", event.window, target.workspace, target.tier);
        let executor = self.executor.clone();
        self.assignments
            .spawn(async move { executor.execute(&event, &target, launch_used).await });
    }

    fn record(&mut self, record: AssignmentRecord) {
        if !record.success {
            debug!(
                "Назначение {} не удалось: {:?} {}",
                record.window,
                record.outcome,
                record.error.as_deref().unwrap_or("")
            );
        }
        self.history.push(record);
    }

    fn handle_control(&mut self, control: ControlMessage) {
        match control {
            ControlMessage::Launch(request) => {
                if let Err(e) = self.register_launch(request) {
                    warn!("Уведомление о запуске отклонено: {}", e);
                }
            }
            ControlMessage::Query(query, reply) => {
                let _ = reply.send(self.report(&query));
            }
            ControlMessage::Reload(config) => self.reload(&config),
        }
    }

    pub fn register_launch(&mut self, request: LaunchRequest) -> Result<()> {
        self.registry.register(request)
    }

    fn reload(&mut self, config: &Config) {
        let rebuilt = AssignmentConfiguration::from_config(config)
            .and_then(|configuration| Ok((configuration, Cascade::from_config(config)?)));
        match rebuilt {
            Ok((configuration, cascade)) => {
                info!("🔄 Правила перезагружены: {}", configuration.rule_count());
                self.configuration = configuration;
                self.cascade = cascade;
            }
            Err(e) => warn!("Перезагрузка отклонена, оставляем текущие правила: {:#}", e),
        }
    }

    pub fn report(&self, query: &DiagnosticsQuery) -> DiagnosticsReport {
        let now = Instant::now();
        let (assignments, gaps) = self.history.query(query, self.gaps.gaps(), now);
        DiagnosticsReport {
            assignments,
            gaps,
            subscriptions: self.subscription_snapshots(now),
            pending_launches: self.registry.pending_count_at(now),
            launch_stats: self.registry.stats(),
            evicted_records: self.history.evicted(),
        }
    }

    pub fn subscription_snapshots(&self, now: Instant) -> Vec<SubscriptionSnapshot> {
        self.subscriptions.values().map(|s| s.snapshot(now)).collect()
    }

    pub fn history(&self) -> &AssignmentHistory {
        &self.history
    }

    pub fn gaps(&self) -> &EventGapDetector {
        &self.gaps
    }

    pub fn registry(&self) -> &LaunchNotificationRegistry {
        &self.registry
    }

    pub fn retry_stats(&self) -> RetryStats {
        self.retry.stats()
    }
}
