use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub scoring: ScoringConfig,
    pub scan: ScanPaths,
    pub storage: StorageConfig,
    pub capabilities: CapabilityConfig,
}

/// Scheduling tunables. Backoff and aging defaults are business choices, kept
/// configurable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub retry_backoff_secs: i64,
    pub aging_threshold_days: i64,
    pub aging_boost: f64,
    pub aging_interval_secs: u64,
    /// How long a deferred item waits before its capability is checked again
    /// when no readiness estimate applies.
    pub capability_recheck_secs: i64,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub rate_window_minutes: i64,
    pub max_content_bytes: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_secs: 60,
            aging_threshold_days: 30,
            aging_boost: 25.0,
            aging_interval_secs: 3600,
            capability_recheck_secs: 86_400,
            workers: 4,
            poll_interval_ms: 500,
            rate_window_minutes: 60,
            max_content_bytes: 64 * 1024,
        }
    }
}

impl QueueConfig {
    pub fn retry_backoff(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_backoff_secs)
    }

    pub fn aging_threshold(&self) -> chrono::Duration {
        chrono::Duration::days(self.aging_threshold_days)
    }

    pub fn capability_recheck(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.capability_recheck_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub content_keywords: Vec<String>,
    pub filename_keywords: Vec<String>,
    pub path_keywords: Vec<String>,
    pub urgency_markers: Vec<String>,
    /// Composite at or above which a sibling counts as relevant context.
    pub relevance_threshold: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            content_keywords: words(&[
                "decision",
                "decided",
                "strategy",
                "insight",
                "breakthrough",
                "lesson learned",
                "milestone",
                "deadline",
                "contract",
                "agreement",
                "budget",
                "roadmap",
                "proposal",
                "invoice",
                "risk",
                "architecture",
            ]),
            filename_keywords: words(&[
                "report", "contract", "invoice", "proposal", "strategy", "plan", "roadmap",
                "minutes", "budget", "backup", "archive", "export",
            ]),
            path_keywords: words(&[
                "projects",
                "clients",
                "contracts",
                "finance",
                "legal",
                "research",
                "archive",
                "important",
                "work",
            ]),
            urgency_markers: words(&["urgent", "critical", "asap", "priority", "urgente"]),
            relevance_threshold: 50,
        }
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanPaths {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite`, `file` or `memory`.
    pub kind: String,
    pub path: String,
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "sqlite".to_string(),
            path: "data/intake.db".to_string(),
            key: "queue".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityConfig {
    /// Directory of TOML files declaring future capabilities.
    pub path: Option<String>,
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(
        config::Environment::with_prefix("INTAKE")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}
