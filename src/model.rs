use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub notification_ttl: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Error,
    Saved,
    /// Anything the service reports that is not one of the known states.
    #[serde(other)]
    Unknown,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Saved => "saved",
            SessionStatus::Unknown => "unknown",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionStatus::Running => "Running",
            SessionStatus::Paused => "Paused",
            SessionStatus::Completed => "Completed",
            SessionStatus::Error => "Error",
            SessionStatus::Saved => "Saved",
            SessionStatus::Unknown => "Unknown",
        }
    }

    /// Only interrupted sessions can be continued.
    pub fn can_continue(self) -> bool {
        matches!(
            self,
            SessionStatus::Paused | SessionStatus::Error | SessionStatus::Saved
        )
    }
}

/// A session as reported by the service. The client only ever holds a cached copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub segmento: Option<String>,
    #[serde(default)]
    pub produto: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub paused_at: Option<String>,
    #[serde(default)]
    pub etapas_salvas: u32,
    #[serde(default)]
    pub error: Option<String>,
    // Only present on the status endpoint.
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub saved: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub percentage: f64,
    pub current_step: String,
    pub total_steps: Option<u32>,
    pub estimated_time: Option<String>,
    pub completed: bool,
}

impl ProgressSnapshot {
    pub fn new(
        percentage: f64,
        current_step: String,
        total_steps: Option<u32>,
        estimated_time: Option<String>,
        completed: bool,
    ) -> Self {
        Self {
            percentage: clamp_percentage(percentage),
            current_step,
            total_steps,
            estimated_time,
            completed,
        }
    }
}

/// Clamp a reported percentage into `0..=100`; NaN reads as no progress.
pub fn clamp_percentage(p: f64) -> f64 {
    if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub severity: Severity,
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
}

/// Lifecycle actions that map onto `POST /api/sessions/{id}/<action>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    Pause,
    Resume,
    Save,
    Continue,
}

impl SessionAction {
    pub fn path_segment(self) -> &'static str {
        match self {
            SessionAction::Pause => "pause",
            SessionAction::Resume => "resume",
            SessionAction::Save => "save",
            SessionAction::Continue => "continue",
        }
    }
}

/// Analysis form as submitted to `POST /api/analyze`. Empty optional fields are
/// left out of the request body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisForm {
    pub segmento: String,
    pub produto: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publico: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preco: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objetivo_receita: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcamento_marketing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prazo_lancamento: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concorrentes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dados_adicionais: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

/// Form field keys in display order.
pub const FORM_FIELDS: [&str; 10] = [
    "segmento",
    "produto",
    "publico",
    "preco",
    "objetivo_receita",
    "orcamento_marketing",
    "prazo_lancamento",
    "concorrentes",
    "dados_adicionais",
    "query",
];

impl AnalysisForm {
    /// Build a form from a key/value map, as persisted in `analysisFormData`.
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Self {
        let opt = |k: &str| {
            fields
                .get(k)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            segmento: fields.get("segmento").cloned().unwrap_or_default(),
            produto: fields.get("produto").cloned().unwrap_or_default(),
            publico: opt("publico"),
            preco: opt("preco"),
            objetivo_receita: opt("objetivo_receita"),
            orcamento_marketing: opt("orcamento_marketing"),
            prazo_lancamento: opt("prazo_lancamento"),
            concorrentes: opt("concorrentes"),
            dados_adicionais: opt("dados_adicionais"),
            query: opt("query"),
        }
    }

    pub fn to_fields(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        out.insert("segmento".to_string(), self.segmento.clone());
        out.insert("produto".to_string(), self.produto.clone());
        let optional = [
            ("publico", &self.publico),
            ("preco", &self.preco),
            ("objetivo_receita", &self.objetivo_receita),
            ("orcamento_marketing", &self.orcamento_marketing),
            ("prazo_lancamento", &self.prazo_lancamento),
            ("concorrentes", &self.concorrentes),
            ("dados_adicionais", &self.dados_adicionais),
            ("query", &self.query),
        ];
        for (k, v) in optional {
            if let Some(v) = v {
                out.insert(k.to_string(), v.clone());
            }
        }
        out
    }
}

/// Events emitted by the controller and consumed by presentation layers.
#[derive(Debug, Clone)]
pub enum DashboardEvent {
    SessionsReplaced(Vec<Session>),
    SessionUpdated(Session),
    SessionRemoved(String),
    SessionDetail(Session),
    ActiveSession {
        session_id: Option<String>,
        polling: bool,
    },
    Progress(ProgressSnapshot),
    PollingStopped {
        session_id: String,
        reason: StopReason,
    },
    Notified(Notification),
    Dismissed(u64),
    Busy(Option<String>),
}

/// Why a progress poll ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Failed,
    Paused,
    Replaced,
    Removed,
    Disposed,
}
