use crate::error::Result;
use crate::events::LaunchRequest;
use crate::services::coordinator::ControlMessage;
use crate::services::diagnostics::DiagnosticsQuery;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Строка протокола управляющего сокета (JSON, одна строка - одно сообщение)
///
/// ```json
/// {"type":"launch","id":"kitty-1","app_name":"kitty","signature":{"app_id":"kitty"},"workspace":4}
/// {"type":"query","failures_only":true,"limit":20}
/// ```
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Уведомление о запуске, без ответа
    Launch(LaunchRequest),
    /// Диагностический запрос, ответ - одна строка JSON
    Query(DiagnosticsQuery),
}

/// Unix-сокет для производителей уведомлений и диагностических клиентов
pub struct ControlSocket {
    socket_path: PathBuf,
    control: mpsc::Sender<ControlMessage>,
}

impl ControlSocket {
    pub fn new(socket_path: PathBuf, control: mpsc::Sender<ControlMessage>) -> Self {
        Self { socket_path, control }
    }

    /// Принимать соединения до отмены задачи
    pub async fn run(self) -> Result<()> {
        // Сокет от предыдущего запуска
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!("🔌 Управляющий сокет: {}", self.socket_path.display());

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    let control = self.control.clone();
                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.into_split();
                        let mut lines = BufReader::new(reader).lines();

                        while let Ok(Some(line)) = lines.next_line().await {
                            if !handle_line(&line, &control, &mut writer).await {
                                break;
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("Ошибка accept на управляющем сокете: {}", e);
                    continue;
                }
            }
        }
    }
}

/// Обработать одну строку; `false` - координатор остановлен или клиент ушёл
async fn handle_line<W>(line: &str, control: &mpsc::Sender<ControlMessage>, writer: &mut W) -> bool
where
    W: AsyncWrite + Unpin,
{
    let line = line.trim();
    if line.is_empty() {
        return true;
    }

    let message = match serde_json::from_str::<ClientMessage>(line) {
        Ok(message) => message,
        Err(e) => {
            warn!("Неверное сообщение на управляющем сокете: {}", e);
            let reply = serde_json::json!({ "error": e.to_string() });
            return write_line(writer, &reply.to_string()).await;
        }
    };

    match message {
        ClientMessage::Launch(request) => {
            debug!("Уведомление о запуске {} ({})", request.id, request.app_name);
            control.send(ControlMessage::Launch(request)).await.is_ok()
        }
        ClientMessage::Query(query) => {
            let (tx, rx) = oneshot::channel();
            if control.send(ControlMessage::Query(query, tx)).await.is_err() {
                return false;
            }
            let Ok(report) = rx.await else {
                return false;
            };
            match serde_json::to_string(&report) {
                Ok(json) => write_line(writer, &json).await,
                Err(e) => {
                    warn!("Не удалось сериализовать отчёт: {}", e);
                    false
                }
            }
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> bool
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };
    written.await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::diagnostics::{AssignmentOutcome, DiagnosticsReport};
    use crate::services::launch_registry::RegistryStats;
    use tokio::time::Duration;

    #[test]
    fn launch_message_parses_with_defaults() {
        let line = r#"{"type":"launch","id":"k1","app_name":"kitty","signature":{"app_id":"kitty"},"workspace":4}"#;
        match serde_json::from_str::<ClientMessage>(line).unwrap() {
            ClientMessage::Launch(request) => {
                assert_eq!(request.id, "k1");
                assert_eq!(request.workspace, Some(4));
                assert_eq!(request.signature.app_id.as_deref(), Some("kitty"));
                assert_eq!(request.ttl_ms, None);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn query_message_parses_filters() {
        let line = r#"{"type":"query","window":94,"outcome":"command_rejected"}"#;
        match serde_json::from_str::<ClientMessage>(line).unwrap() {
            ClientMessage::Query(query) => {
                assert_eq!(query.window, Some(94));
                assert_eq!(query.outcome, Some(AssignmentOutcome::CommandRejected));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn run_replaces_stale_socket_file() {
        let path = std::env::temp_dir().join(format!("wsplace-ctl-{}.sock", std::process::id()));
        std::fs::write(&path, b"stale").unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let server = tokio::spawn(ControlSocket::new(path.clone(), tx).run());

        let mut stream = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(stream) = tokio::net::UnixStream::connect(&path).await {
                    break stream;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("socket was not bound");

        let line = r#"{"type":"launch","id":"k1","app_name":"kitty","signature":{"app_id":"kitty"}}"#;
        stream.write_all(format!("{}\n", line).as_bytes()).await.unwrap();
        let forwarded = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(matches!(forwarded, Some(ControlMessage::Launch(_))));

        server.abort();
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn launch_is_forwarded_without_reply() {
        let (tx, mut rx) = mpsc::channel(4);
        let mut out = Vec::new();
        let line = r#"{"type":"launch","id":"k1","app_name":"kitty","signature":{"app_id":"kitty"}}"#;

        assert!(handle_line(line, &tx, &mut out).await);
        assert!(matches!(rx.recv().await, Some(ControlMessage::Launch(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn malformed_line_gets_error_reply() {
        let (tx, _rx) = mpsc::channel(4);
        let mut out = Vec::new();

        assert!(handle_line("{not json", &tx, &mut out).await);
        let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert!(reply.get("error").is_some());
    }

    #[tokio::test]
    async fn query_is_answered_with_one_json_line() {
        let (tx, mut rx) = mpsc::channel(4);
        tokio::spawn(async move {
            if let Some(ControlMessage::Query(_, reply)) = rx.recv().await {
                let _ = reply.send(DiagnosticsReport {
                    assignments: Vec::new(),
                    gaps: Vec::new(),
                    subscriptions: Vec::new(),
                    pending_launches: 2,
                    launch_stats: RegistryStats::default(),
                    evicted_records: 0,
                });
            }
        });
        let mut out = Vec::new();

        assert!(handle_line(r#"{"type":"query"}"#, &tx, &mut out).await);
        assert_eq!(out.last(), Some(&b'\n'));
        let reply: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(reply["pending_launches"], 2);
    }
}
