//! Prompt templates and the resolver contract.

use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

// Pre-compiled regex for `{placeholder}` names
static RE_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_][a-z0-9_]*)\}").unwrap());

/// Prompt key of the per-sub-task template (not a stage of its own).
pub const SUBTASK_PROMPT: &str = "subtask";

/// Version shipped with [`BuiltinPrompts`].
pub const BUILTIN_VERSION: &str = "v1";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PromptError {
    #[error("Prompt '{stage}' has no version '{version}'")]
    VersionNotFound { stage: String, version: String },

    #[error("Prompt '{stage}' references unknown placeholder(s): {names}")]
    MissingPlaceholder { stage: String, names: String },
}

/// A versioned template plus its system instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub stage: String,
    pub version: String,
    pub template: String,
    pub system_instruction: String,
}

impl PromptTemplate {
    pub fn new(
        stage: impl Into<String>,
        version: impl Into<String>,
        template: impl Into<String>,
        system_instruction: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            version: version.into(),
            template: template.into(),
            system_instruction: system_instruction.into(),
        }
    }

    /// Placeholder names used by the template, sorted.
    pub fn placeholders(&self) -> BTreeSet<String> {
        RE_PLACEHOLDER
            .captures_iter(&self.template)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Substitutes every `{name}` in one pass. Substituted values are not
    /// scanned again. Fails if any placeholder has no value.
    pub fn render(&self, vars: &HashMap<&str, String>) -> Result<String, PromptError> {
        let missing: Vec<String> = self
            .placeholders()
            .into_iter()
            .filter(|name| !vars.contains_key(name.as_str()))
            .collect();
        if !missing.is_empty() {
            return Err(PromptError::MissingPlaceholder {
                stage: self.stage.clone(),
                names: missing.join(", "),
            });
        }

        let rendered = RE_PLACEHOLDER.replace_all(&self.template, |caps: &Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }
}

/// Looks up the template for a stage at a given version.
pub trait PromptResolver: Send + Sync {
    fn resolve(&self, stage: &str, version: &str) -> Result<PromptTemplate, PromptError>;
}

/// In-memory resolver, seeded with the built-in `v1` templates.
#[derive(Debug, Clone)]
pub struct BuiltinPrompts {
    templates: HashMap<(String, String), PromptTemplate>,
}

impl BuiltinPrompts {
    pub fn new() -> Self {
        let mut prompts = Self::empty();
        for template in builtin_templates() {
            prompts.insert(template);
        }
        prompts
    }

    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Adds or replaces a template.
    pub fn insert(&mut self, template: PromptTemplate) {
        self.templates
            .insert((template.stage.clone(), template.version.clone()), template);
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.insert(template);
        self
    }
}

impl Default for BuiltinPrompts {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptResolver for BuiltinPrompts {
    fn resolve(&self, stage: &str, version: &str) -> Result<PromptTemplate, PromptError> {
        self.templates
            .get(&(stage.to_string(), version.to_string()))
            .cloned()
            .ok_or_else(|| PromptError::VersionNotFound {
                stage: stage.to_string(),
                version: version.to_string(),
            })
    }
}

fn builtin_templates() -> Vec<PromptTemplate> {
    vec![
        PromptTemplate::new(
            "extraction",
            BUILTIN_VERSION,
            "Extract the key facts from the documents below.\n\
             Return a single JSON object whose keys are fact names and whose values \
             are the facts (strings, numbers, lists or nested objects).\n\n\
             Caller metadata:\n{metadata}\n\nDocuments:\n{documents}",
            "You are a careful analyst. Only report facts stated in the documents. \
             Output JSON only.",
        ),
        PromptTemplate::new(
            "planning",
            BUILTIN_VERSION,
            "Plan the analysis of the documents ({document_names}).\n\
             Return a JSON object with an \"objective\" string and a \"tasks\" array. \
             Each task has \"task_text\" (first line \"Agent: <label>\"), \
             \"relevant_content\" (the facts the task needs) and \"tool_names\" \
             (array, may be empty).\n\n\
             Caller metadata:\n{metadata}\n\nExtracted facts:\n{facts}",
            "You are a lead analyst splitting work into independent tasks. Output JSON only.",
        ),
        PromptTemplate::new(
            SUBTASK_PROMPT,
            BUILTIN_VERSION,
            "You are acting as: {identity}\n\nTask:\n{task_text}\n\n\
             Relevant content:\n{relevant_content}\n\nAvailable tools: {tools}\n\n\
             Answer with your findings as plain text.",
            "You are a specialist analyst. Be specific and cite the content you rely on.",
        ),
        PromptTemplate::new(
            "synthesis",
            BUILTIN_VERSION,
            "Objective: {objective}\n\nExtracted facts:\n{facts}\n\n\
             Specialist results:\n{subtask_digest}\n\nKnown issues:\n{diagnostics}\n\n\
             Return a JSON object with \"summary\" (string), \"key_findings\" (array of strings), \
             \"confidence\" (\"low\", \"medium\" or \"high\"), \
             \"recommendations\" (array of strings) \
             and optionally \"gaps\" (array of strings).",
            "You are a senior analyst reconciling specialist findings. Output JSON only.",
        ),
        PromptTemplate::new(
            "report",
            BUILTIN_VERSION,
            "Write the final analytical report for run {run_id}.\n\n\
             Synthesis:\n{synthesis}\n\nExtracted facts:\n{facts}\n\n\
             Specialist results:\n{subtask_digest}\n\nKnown issues:\n{diagnostics}\n\n\
             Write plain text with headed sections. Mention known issues that limit the report.",
            "You are a report writer. Be clear, structured and honest about limitations.",
        ),
    ]
}
