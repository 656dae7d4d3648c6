use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod services;
mod utils;

use config::Config;
use services::{create_window_manager, ControlMessage, ControlSocket, EngineCoordinator};
use utils::ProcEnvReader;

#[derive(Parser, Debug)]
#[command(name = "wsplace")]
#[command(about = "Демон размещения новых окон по рабочим столам sway/i3")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "wsplace.toml")]
    config: String,

    /// Режим сухого запуска (эмулятор оконного менеджера вместо sway)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (по умолчанию из конфигурации)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Конфигурация нужна раньше логирования: в ней уровень и формат
    let config = Config::load(&args.config)?;
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск wsplace v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - команды не доходят до оконного менеджера");
    }

    let config = Arc::new(config);
    let window_manager = create_window_manager(&config, args.dry_run)?;
    let process_env = Arc::new(ProcEnvReader::new(
        &config.process.workspace_var,
        &config.process.app_name_var,
    ));

    let (mut coordinator, control_tx) = EngineCoordinator::new(config.clone(), window_manager, process_env)?;

    // Готовность только после того, как живы все подписки
    coordinator.start().await?;
    info!("✅ Движок готов");

    let socket_path = config.socket_path();
    let control_socket = ControlSocket::new(socket_path.clone(), control_tx.clone());
    let socket_handle = tokio::spawn(async move {
        if let Err(e) = control_socket.run().await {
            error!("Ошибка управляющего сокета: {}", e);
        }
    });
    let mut engine_handle = tokio::spawn(coordinator.run());
    let mut engine_finished = false;

    let mut hangup = signal::unix::signal(SignalKind::hangup())?;

    // Ожидание сигнала завершения или фатальной ошибки движка
    let outcome: Result<()> = loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                    Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
                }
                break Ok(());
            }
            _ = hangup.recv() => reload(&args.config, &control_tx).await,
            joined = &mut engine_handle => {
                engine_finished = true;
                break match joined {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => {
                        error!("Движок остановлен: {}", e);
                        Err(e.into())
                    }
                    Err(e) => Err(anyhow::anyhow!("Задача движка завершилась аварийно: {}", e)),
                };
            }
        }
    };

    info!("Завершение работы...");

    socket_handle.abort();
    if !engine_finished {
        engine_handle.abort();
    }

    // Ожидаем завершения задач (с таймаутом)
    let shutdown_timeout = tokio::time::Duration::from_secs(5);
    let shutdown_result = tokio::time::timeout(shutdown_timeout, async {
        let _ = socket_handle.await;
        if !engine_finished {
            let _ = engine_handle.await;
        }
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("Все сервисы завершили работу корректно"),
        Err(_) => warn!("Таймаут при завершении сервисов"),
    }

    if let Err(e) = std::fs::remove_file(&socket_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Не удалось удалить {}: {}", socket_path.display(), e);
        }
    }

    info!("wsplace завершил работу");
    outcome
}

/// SIGHUP: перечитать файл и заменить таблицу правил целиком
async fn reload(path: &str, control: &mpsc::Sender<ControlMessage>) {
    match Config::load(path) {
        Ok(config) => {
            info!("Перезагрузка конфигурации из {}", path);
            if control.send(ControlMessage::Reload(Arc::new(config))).await.is_err() {
                warn!("Движок не принимает перезагрузку");
            }
        }
        Err(e) => warn!("Новая конфигурация отклонена: {:#}", e),
    }
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    let (compact, json) = if format == "json" {
        (None, Some(fmt::layer().json()))
    } else {
        (Some(fmt::layer().compact()), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(compact)
        .with(json)
        .init();

    Ok(())
}
