//! Builders for model replies used by the stub collaborator.

#![allow(dead_code)]

use serde_json::{json, Value};

/// A well-formed sub-task labelled `Agent: <label>`.
pub fn task(label: &str) -> Value {
    json!({
        "task_text": format!("Agent: {}\nAnalyse the material from the {} angle.", label, label),
        "relevant_content": format!("Facts relevant to {}", label),
        "tool_names": []
    })
}

/// Labels `Analyst 1` .. `Analyst n`.
pub fn labels(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("Analyst {}", i)).collect()
}

/// Builder for the Planning stage's reply.
pub struct PlanBuilder {
    objective: Option<String>,
    tasks: Vec<Value>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            objective: Some("Assess the quarterly position".to_string()),
            tasks: Vec::new(),
        }
    }

    pub fn with_tasks(n: usize) -> Self {
        let mut builder = Self::new();
        for label in labels(n) {
            builder = builder.task(&label);
        }
        builder
    }

    pub fn task(mut self, label: &str) -> Self {
        self.tasks.push(task(label));
        self
    }

    pub fn raw_task(mut self, value: Value) -> Self {
        self.tasks.push(value);
        self
    }

    pub fn without_objective(mut self) -> Self {
        self.objective = None;
        self
    }

    pub fn build(self) -> Value {
        let mut plan = json!({ "tasks": self.tasks });
        if let Some(objective) = self.objective {
            plan["objective"] = json!(objective);
        }
        plan
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn facts() -> Value {
    json!({
        "company": "Acme Corporation",
        "revenue": "12.4M",
        "period": "Q3"
    })
}

pub fn valid_synthesis() -> Value {
    json!({
        "summary": "Revenue grew while margins narrowed.",
        "key_findings": ["Revenue up 12%", "Margins down 2pp"],
        "confidence": "medium",
        "recommendations": ["Review supplier contracts"]
    })
}
