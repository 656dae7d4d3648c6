use super::r#trait::{CommandReplies, CommandReply, SubscriptionTask, WindowManager};
use crate::error::{PlacerError, Result};
use crate::events::{EngineMessage, EventCategory, PeerEvent, WindowEventType, WindowHandle, WindowInfo};
use crate::placer_error;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const MAGIC: &[u8; 6] = b"i3-ipc";

const RUN_COMMAND: u32 = 0;
const SUBSCRIBE: u32 = 2;
const GET_TREE: u32 = 4;

const EVENT_BIT: u32 = 0x8000_0000;
const EVENT_WORKSPACE: u32 = EVENT_BIT;
const EVENT_OUTPUT: u32 = EVENT_BIT | 1;
const EVENT_MODE: u32 = EVENT_BIT | 2;
const EVENT_WINDOW: u32 = EVENT_BIT | 3;
const EVENT_TICK: u32 = EVENT_BIT | 7;

// Защита от мусора в заголовке: дерево большого стола укладывается с запасом
const MAX_PAYLOAD: u32 = 64 * 1024 * 1024;

/// Клиент i3-ipc (sway, i3) поверх Unix-сокета
pub struct SwayWindowManager {
    socket: PathBuf,
}

impl SwayWindowManager {
    pub fn new(socket: Option<PathBuf>) -> Result<Self> {
        let socket = match socket {
            Some(path) => path,
            None => std::env::var_os("SWAYSOCK")
                .or_else(|| std::env::var_os("I3SOCK"))
                .map(PathBuf::from)
                .ok_or_else(|| {
                    placer_error!(service_unavailable, "SWAYSOCK/I3SOCK не заданы и wm_socket не указан")
                })?,
        };

        info!("Оконный менеджер: i3-ipc через {:?}", socket);
        Ok(Self { socket })
    }

    async fn connect(&self) -> Result<UnixStream> {
        UnixStream::connect(&self.socket)
            .await
            .map_err(|e| placer_error!(ipc, "не удалось подключиться к {:?}: {}", self.socket, e))
    }

    async fn request(&self, message_type: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let mut stream = self.connect().await?;
        write_message(&mut stream, message_type, payload).await?;
        let (reply_type, body) = read_message(&mut stream).await?;
        if reply_type != message_type {
            return Err(placer_error!(ipc, "ожидался ответ типа {}, получен {}", message_type, reply_type));
        }
        Ok(body)
    }
}

async fn write_message(stream: &mut UnixStream, message_type: u32, payload: &[u8]) -> Result<()> {
    let mut frame = Vec::with_capacity(14 + payload.len());
    frame.extend_from_slice(MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&message_type.to_le_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_message(stream: &mut UnixStream) -> Result<(u32, Vec<u8>)> {
    let mut header = [0u8; 14];
    stream.read_exact(&mut header).await?;
    let (message_type, len) = parse_header(&header)?;
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok((message_type, body))
}

fn parse_header(header: &[u8; 14]) -> Result<(u32, u32)> {
    if &header[..6] != MAGIC {
        return Err(placer_error!(ipc, "неверная сигнатура кадра i3-ipc"));
    }
    let len = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);
    let message_type = u32::from_le_bytes([header[10], header[11], header[12], header[13]]);
    if len > MAX_PAYLOAD {
        return Err(placer_error!(ipc, "слишком большой кадр: {} байт", len));
    }
    Ok((message_type, len))
}

#[derive(Debug, Deserialize)]
struct SuccessReply {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WindowProperties {
    class: Option<String>,
    instance: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TreeNode {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type", default)]
    node_type: String,
    #[serde(default)]
    num: Option<i32>,
    #[serde(default)]
    app_id: Option<String>,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    shell: Option<String>,
    #[serde(default)]
    window: Option<u64>,
    #[serde(default)]
    window_properties: Option<WindowProperties>,
    #[serde(default)]
    floating: Option<String>,
    #[serde(default)]
    nodes: Vec<TreeNode>,
    #[serde(default)]
    floating_nodes: Vec<TreeNode>,
}

impl TreeNode {
    fn is_window(&self) -> bool {
        if self.app_id.is_some() || self.window.is_some() || self.window_properties.is_some() {
            return true;
        }
        // Вид без app_id (toolkit ещё не выставил): лист с pid или shell
        let leaf = self.nodes.is_empty() && self.floating_nodes.is_empty();
        matches!(self.node_type.as_str(), "con" | "floating_con")
            && leaf
            && (self.pid.is_some() || self.shell.is_some())
    }

    fn to_window_info(&self, workspace: Option<u32>, output: Option<&str>) -> WindowInfo {
        let props = self.window_properties.as_ref();
        WindowInfo {
            handle: WindowHandle(self.id),
            app_id: self.app_id.clone(),
            class: props.and_then(|p| p.class.clone()),
            instance: props.and_then(|p| p.instance.clone()),
            title: props.and_then(|p| p.title.clone()).or_else(|| self.name.clone()),
            workspace,
            output: output.map(str::to_string),
            floating: self.node_type == "floating_con"
                || matches!(self.floating.as_deref(), Some("auto_on" | "user_on")),
            pid: self.pid,
        }
    }
}

/// Поиск окна в дереве с учётом объемлющего рабочего стола и вывода
fn find_window(
    node: &TreeNode,
    handle: WindowHandle,
    workspace: Option<u32>,
    output: Option<&str>,
) -> Option<WindowInfo> {
    let (workspace, output) = match node.node_type.as_str() {
        "output" => (workspace, node.name.as_deref()),
        "workspace" => (node.num.filter(|n| *n > 0).map(|n| n as u32), output),
        _ => (workspace, output),
    };

    if node.id == handle.value() && node.is_window() {
        return Some(node.to_window_info(workspace, output));
    }

    node.nodes
        .iter()
        .chain(node.floating_nodes.iter())
        .find_map(|child| find_window(child, handle, workspace, output))
}

#[derive(Debug, Deserialize)]
struct WindowEventPayload {
    change: String,
    container: TreeNode,
}

#[derive(Debug, Deserialize)]
struct WorkspaceRef {
    #[serde(default)]
    num: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct WorkspaceEventPayload {
    change: String,
    #[serde(default)]
    current: Option<WorkspaceRef>,
}

#[derive(Debug, Deserialize)]
struct ChangeOnly {
    #[serde(default)]
    change: String,
}

#[derive(Debug, Deserialize)]
struct TickPayload {
    #[serde(default)]
    first: bool,
    #[serde(default)]
    payload: String,
}

fn parse_event(event_type: u32, body: &[u8]) -> Result<Option<PeerEvent>> {
    let event = match event_type {
        EVENT_WINDOW => {
            let payload: WindowEventPayload = serde_json::from_slice(body)?;
            PeerEvent::Window {
                change: WindowEventType::parse(&payload.change),
                window: payload.container.to_window_info(None, None),
            }
        }
        EVENT_WORKSPACE => {
            let payload: WorkspaceEventPayload = serde_json::from_slice(body)?;
            PeerEvent::Workspace {
                change: payload.change,
                current: payload
                    .current
                    .and_then(|ws| ws.num)
                    .filter(|n| *n > 0)
                    .map(|n| n as u32),
            }
        }
        EVENT_OUTPUT => PeerEvent::Output {
            change: serde_json::from_slice::<ChangeOnly>(body)?.change,
        },
        EVENT_MODE => PeerEvent::Mode {
            change: serde_json::from_slice::<ChangeOnly>(body)?.change,
        },
        EVENT_TICK => {
            let payload: TickPayload = serde_json::from_slice(body)?;
            PeerEvent::Tick {
                first: payload.first,
                payload: payload.payload,
            }
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

#[async_trait::async_trait]
impl WindowManager for SwayWindowManager {
    async fn subscribe(
        &self,
        category: EventCategory,
        generation: u64,
        sink: mpsc::Sender<EngineMessage>,
    ) -> Result<SubscriptionTask> {
        let mut stream = self.connect().await?;
        let payload = serde_json::to_vec(&[category.as_str()])?;
        write_message(&mut stream, SUBSCRIBE, &payload).await?;

        let (reply_type, body) = read_message(&mut stream).await?;
        let reply: SuccessReply = serde_json::from_slice(&body)?;
        if reply_type != SUBSCRIBE || !reply.success {
            return Err(placer_error!(ipc, "подписка на {} отклонена", category));
        }

        debug!("Подписка {} установлена (поколение {})", category, generation);

        let handle = tokio::spawn(async move {
            let reason = loop {
                let (event_type, body) = match read_message(&mut stream).await {
                    Ok(message) => message,
                    Err(e) => break e.to_string(),
                };

                match parse_event(event_type, &body) {
                    Ok(Some(event)) => {
                        let message = EngineMessage::Event {
                            category,
                            generation,
                            event,
                        };
                        if sink.send(message).await.is_err() {
                            // Координатор остановлен
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Не удалось разобрать событие {}: {}", category, e),
                }
            };

            let _ = sink
                .send(EngineMessage::SubscriptionClosed {
                    category,
                    generation,
                    reason,
                })
                .await;
        });

        Ok(SubscriptionTask::spawned(handle))
    }

    async fn get_window(&self, handle: WindowHandle) -> Result<Option<WindowInfo>> {
        let body = self.request(GET_TREE, b"").await?;
        let root: TreeNode = serde_json::from_slice(&body)?;
        Ok(find_window(&root, handle, None, None))
    }

    async fn run_command(&self, command: &str) -> Result<CommandReplies> {
        debug!("i3-ipc RUN_COMMAND: {}", command);
        let body = self.request(RUN_COMMAND, command.as_bytes()).await?;
        let replies: Vec<SuccessReply> = serde_json::from_slice(&body)?;
        if replies.is_empty() {
            return Err(PlacerError::Ipc("пустой ответ на команду".to_string()));
        }
        Ok(replies
            .into_iter()
            .map(|r| CommandReply {
                success: r.success,
                error: r.error,
            })
            .collect())
    }
}
