use super::window::{WindowHandle, WindowInfo};
use crate::error::Result;
use crate::placer_error;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::{Duration, Instant};

/// Ожидаемая сигнатура окна в сообщении о запуске
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSignature {
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub app_id_pattern: Option<String>,
    #[serde(default)]
    pub title_pattern: Option<String>,
}

/// Сообщение от лаунчера: "приложение скоро создаст окно, положи его сюда"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub id: String,
    pub app_name: String,
    #[serde(default)]
    pub session: Option<String>,
    pub signature: WindowSignature,
    /// Отсутствие означает "использовать правило из конфигурации"
    #[serde(default)]
    pub workspace: Option<u32>,
    /// Рабочий стол, на котором выполнилась команда запуска
    #[serde(default)]
    pub launch_workspace: Option<u32>,
    /// Время отправки по часам лаунчера, только для диагностики
    #[serde(default)]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    Pending,
    Matched,
    Expired,
}

#[derive(Debug, Clone)]
struct CompiledSignature {
    app_id: Option<String>,
    app_id_pattern: Option<Regex>,
    title_pattern: Option<Regex>,
}

impl CompiledSignature {
    fn compile(signature: &WindowSignature) -> Result<Self> {
        let compile = |pattern: &Option<String>| -> Result<Option<Regex>> {
            pattern
                .as_deref()
                .filter(|p| !p.is_empty())
                .map(|p| {
                    Regex::new(p).map_err(|e| placer_error!(invalid_signature, "шаблон '{}': {}", p, e))
                })
                .transpose()
        };

        let compiled = Self {
            app_id: signature.app_id.clone().filter(|id| !id.is_empty()),
            app_id_pattern: compile(&signature.app_id_pattern)?,
            title_pattern: compile(&signature.title_pattern)?,
        };

        if compiled.app_id.is_none()
            && compiled.app_id_pattern.is_none()
            && compiled.title_pattern.is_none()
        {
            return Err(placer_error!(invalid_signature, "сигнатура не содержит ни app_id, ни шаблонов"));
        }

        Ok(compiled)
    }

    /// Оценка совпадения окна с сигнатурой в [0, 1]; None если не совпадает.
    ///
    /// 1.0 точный app_id, 0.9 app_id без учёта регистра (или совпадение с
    /// class/instance), 0.7 шаблон app_id, 0.5 шаблон заголовка.
    fn score(&self, window: &WindowInfo) -> Option<f32> {
        let identifier = window.identifier();
        let mut best: Option<f32> = None;
        let mut bump = |score: f32| best = Some(best.map_or(score, |b| b.max(score)));

        if let Some(expected) = &self.app_id {
            if identifier == Some(expected.as_str()) {
                bump(1.0);
            } else {
                let loose = [window.app_id.as_deref(), window.class.as_deref(), window.instance.as_deref()]
                    .into_iter()
                    .flatten()
                    .any(|candidate| candidate.eq_ignore_ascii_case(expected));
                if loose {
                    bump(0.9);
                }
            }
        }

        if let (Some(pattern), Some(id)) = (&self.app_id_pattern, identifier) {
            if pattern.is_match(id) {
                bump(0.7);
            }
        }

        if let Some(pattern) = &self.title_pattern {
            if !window.title().is_empty() && pattern.is_match(window.title()) {
                bump(0.5);
            }
        }

        best
    }
}

/// Ожидаемый запуск приложения.
///
/// Pending → Matched при корреляции с окном, Pending → Expired по TTL
/// (проверяется лениво при поиске). Из Matched и Expired не возвращается.
#[derive(Debug, Clone)]
pub struct LaunchNotification {
    pub id: String,
    pub app_name: String,
    pub session: Option<String>,
    pub signature: WindowSignature,
    pub target_workspace: Option<u32>,
    pub launch_workspace: Option<u32>,
    pub sent_at_ms: Option<u64>,
    pub created_at: Instant,
    pub ttl: Duration,
    pub state: NotificationState,
    pub matched_window: Option<WindowHandle>,
    pub confidence: f32,
    /// Порядковый номер регистрации, используется для разрешения ничьих
    pub sequence: u64,
    compiled: CompiledSignature,
}

impl LaunchNotification {
    pub fn from_request(request: LaunchRequest, default_ttl: Duration, sequence: u64) -> Result<Self> {
        Self::from_request_at(request, default_ttl, sequence, Instant::now())
    }

    pub fn from_request_at(
        request: LaunchRequest,
        default_ttl: Duration,
        sequence: u64,
        created_at: Instant,
    ) -> Result<Self> {
        if request.id.trim().is_empty() {
            return Err(placer_error!(invalid_signature, "пустой id уведомления"));
        }

        let compiled = CompiledSignature::compile(&request.signature)?;
        let ttl = request.ttl_ms.map(Duration::from_millis).unwrap_or(default_ttl);

        Ok(Self {
            id: request.id,
            app_name: request.app_name,
            session: request.session,
            signature: request.signature,
            target_workspace: request.workspace,
            launch_workspace: request.launch_workspace,
            sent_at_ms: request.timestamp_ms,
            created_at,
            ttl,
            state: NotificationState::Pending,
            matched_window: None,
            confidence: 0.0,
            sequence,
            compiled,
        })
    }

    /// Истёк ли TTL к моменту `now` (граница включительно: created_at + ttl ещё живо)
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > self.ttl
    }

    pub fn is_pending(&self) -> bool {
        self.state == NotificationState::Pending
    }

    pub fn match_score(&self, window: &WindowInfo) -> Option<f32> {
        self.compiled.score(window)
    }

    pub(crate) fn mark_matched(&mut self, window: WindowHandle, confidence: f32) {
        self.state = NotificationState::Matched;
        self.matched_window = Some(window);
        self.confidence = confidence;
    }

    pub(crate) fn mark_expired(&mut self) {
        self.state = NotificationState::Expired;
    }
}

impl fmt::Display for LaunchNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "launch[{}] {}", self.id, self.app_name)?;
        if let Some(ws) = self.target_workspace {
            write!(f, " -> {}", ws)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PlacerError;

    fn request(signature: WindowSignature) -> LaunchRequest {
        LaunchRequest {
            id: "n1".into(),
            app_name: "firefox".into(),
            session: None,
            signature,
            workspace: Some(4),
            launch_workspace: Some(1),
            timestamp_ms: None,
            ttl_ms: None,
        }
    }

    fn notification(signature: WindowSignature) -> LaunchNotification {
        LaunchNotification::from_request(request(signature), Duration::from_secs(5), 1).unwrap()
    }

    #[test]
    fn exact_identifier_scores_highest() {
        let n = notification(WindowSignature {
            app_id: Some("firefox".into()),
            title_pattern: Some("Mozilla".into()),
            ..Default::default()
        });

        let exact = WindowInfo::new(1).with_app_id("firefox").with_title("Mozilla Firefox");
        assert_eq!(n.match_score(&exact), Some(1.0));

        let loose = WindowInfo::new(2).with_class("Firefox");
        assert_eq!(n.match_score(&loose), Some(0.9));

        let by_title = WindowInfo::new(3).with_title("Mozilla Firefox");
        assert_eq!(n.match_score(&by_title), Some(0.5));

        let other = WindowInfo::new(4).with_app_id("kitty");
        assert_eq!(n.match_score(&other), None);
    }

    #[test]
    fn pattern_signature_matches_identifier() {
        let n = notification(WindowSignature {
            app_id_pattern: Some("^org\\.gnome\\.".into()),
            ..Default::default()
        });
        let window = WindowInfo::new(1).with_app_id("org.gnome.Nautilus");
        assert_eq!(n.match_score(&window), Some(0.7));
    }

    #[test]
    fn empty_signature_is_rejected() {
        let result = LaunchNotification::from_request(
            request(WindowSignature::default()),
            Duration::from_secs(5),
            1,
        );
        assert!(matches!(result, Err(PlacerError::InvalidSignature(_))));
    }

    #[test]
    fn broken_pattern_is_rejected() {
        let result = LaunchNotification::from_request(
            request(WindowSignature {
                title_pattern: Some("([".into()),
                ..Default::default()
            }),
            Duration::from_secs(5),
            1,
        );
        assert!(matches!(result, Err(PlacerError::InvalidSignature(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_boundary_is_inclusive() {
        let mut req = request(WindowSignature {
            app_id: Some("firefox".into()),
            ..Default::default()
        });
        req.ttl_ms = Some(5000);
        let n = LaunchNotification::from_request(req, Duration::from_secs(1), 1).unwrap();
        assert_eq!(n.ttl, Duration::from_secs(5));

        let t0 = n.created_at;
        assert!(!n.is_expired_at(t0 + Duration::from_secs(5)));
        assert!(n.is_expired_at(t0 + Duration::from_millis(5001)));
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let json = r#"{"id":"a","app_name":"code","signature":{"app_id":"Code"}}"#;
        let req: LaunchRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.workspace, None);
        assert_eq!(req.signature.app_id.as_deref(), Some("Code"));
        assert_eq!(req.ttl_ms, None);
    }
}
