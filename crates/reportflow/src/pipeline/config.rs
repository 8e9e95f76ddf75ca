use std::time::Duration;

use crate::config::schema::{Config, ModelsConfig};

/// Runtime settings for one pipeline, derived from the file config.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum number of sub-tasks in flight at once.
    pub fanout_width: usize,
    pub run_timeout: Duration,
    pub call_timeout: Duration,
    pub stage_grace: Duration,
    pub prompt_version: String,
    pub max_tool_rounds: u32,
    /// Extra attempts when a structured response does not parse.
    pub structured_retries: u32,
    pub task_preview_chars: usize,
    pub models: ModelsConfig,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        let p = &config.pipeline;
        Self {
            fanout_width: p.fanout_width,
            run_timeout: Duration::from_secs(p.run_timeout_secs),
            call_timeout: Duration::from_secs(p.call_timeout_secs),
            stage_grace: Duration::from_millis(p.stage_grace_ms),
            prompt_version: p.prompt_version.clone(),
            max_tool_rounds: p.max_tool_rounds,
            structured_retries: p.structured_retries,
            task_preview_chars: p.task_preview_chars,
            models: config.models.clone(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
