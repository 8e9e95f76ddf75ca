use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            pipeline: PipelineSettings::default(),
            models: ModelsConfig::default(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_fanout_width")]
    pub fanout_width: usize,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default = "default_stage_grace_ms")]
    pub stage_grace_ms: u64,
    #[serde(default = "default_prompt_version")]
    pub prompt_version: String,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "default_structured_retries")]
    pub structured_retries: u32,
    #[serde(default = "default_task_preview_chars")]
    pub task_preview_chars: usize,
}

fn default_fanout_width() -> usize {
    5
}

fn default_run_timeout_secs() -> u64 {
    600
}

fn default_call_timeout_secs() -> u64 {
    120
}

fn default_stage_grace_ms() -> u64 {
    2_000
}

fn default_prompt_version() -> String {
    "v1".to_string()
}

fn default_max_tool_rounds() -> u32 {
    5
}

fn default_structured_retries() -> u32 {
    2
}

fn default_task_preview_chars() -> usize {
    120
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fanout_width: default_fanout_width(),
            run_timeout_secs: default_run_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            stage_grace_ms: default_stage_grace_ms(),
            prompt_version: default_prompt_version(),
            max_tool_rounds: default_max_tool_rounds(),
            structured_retries: default_structured_retries(),
            task_preview_chars: default_task_preview_chars(),
        }
    }
}

/// Sampling temperature per stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_extraction_temperature")]
    pub extraction_temperature: f32,
    #[serde(default = "default_planning_temperature")]
    pub planning_temperature: f32,
    #[serde(default = "default_subtask_temperature")]
    pub subtask_temperature: f32,
    #[serde(default = "default_synthesis_temperature")]
    pub synthesis_temperature: f32,
    #[serde(default = "default_report_temperature")]
    pub report_temperature: f32,
}

fn default_extraction_temperature() -> f32 {
    0.0
}

fn default_planning_temperature() -> f32 {
    0.2
}

fn default_subtask_temperature() -> f32 {
    0.3
}

fn default_synthesis_temperature() -> f32 {
    0.2
}

fn default_report_temperature() -> f32 {
    0.4
}

impl ModelsConfig {
    /// All temperatures with their config keys.
    pub fn temperatures(&self) -> [(&'static str, f32); 5] {
        [
            ("extraction_temperature", self.extraction_temperature),
            ("planning_temperature", self.planning_temperature),
            ("subtask_temperature", self.subtask_temperature),
            ("synthesis_temperature", self.synthesis_temperature),
            ("report_temperature", self.report_temperature),
        ]
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            extraction_temperature: default_extraction_temperature(),
            planning_temperature: default_planning_temperature(),
            subtask_temperature: default_subtask_temperature(),
            synthesis_temperature: default_synthesis_temperature(),
            report_temperature: default_report_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite file; `~/.reportflow/data/audit.db` when unset.
    #[serde(default)]
    pub database_path: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: default_filter(),
        }
    }
}
