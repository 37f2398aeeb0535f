use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::environment::StopCommand;
use crate::operations::StepDescriptor;
use crate::tokens::DataContext;

const DEFAULT_STOP_SIGNAL: i32 = 15;

fn default_true() -> bool {
    true
}

/// Persisted description of one workload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadDefinition {
    /// Free-form template name, e.g. `minecraft`
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub display: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default)]
    pub autorestart_on_crash: bool,
    #[serde(default)]
    pub data: BTreeMap<String, Variable>,
    #[serde(default)]
    pub install: Vec<StepDescriptor>,
    #[serde(default)]
    pub run: RunConfig,
    /// Backend section: `type`, optional `root`, kind-specific keys
    #[serde(default)]
    pub environment: Map<String, Value>,
}

impl WorkloadDefinition {
    /// Backend kind, `standard` when unset
    pub fn environment_kind(&self) -> &str {
        self.environment
            .get("type")
            .and_then(Value::as_str)
            .filter(|kind| !kind.is_empty())
            .unwrap_or("standard")
    }

    /// Variable values keyed by name, for token expansion
    pub fn data_context(&self) -> DataContext {
        self.data
            .iter()
            .map(|(name, variable)| (name.clone(), variable.value.clone()))
            .collect()
    }

    /// Update variable values; unknown names become new variables.
    ///
    /// Values may be given bare or as `{"value": ...}`.
    pub fn apply_data(&mut self, updates: Map<String, Value>) {
        for (name, update) in updates {
            let value = match update {
                Value::Object(mut object) if object.contains_key("value") => {
                    object.remove("value").unwrap_or(Value::Null)
                }
                other => other,
            };
            self.data.entry(name).or_default().value = value;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Line written to stdin to request a graceful stop
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<String>,
    /// Signal sent when no stop line is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_code: Option<i32>,
    #[serde(default)]
    pub environment_vars: HashMap<String, String>,
    #[serde(default)]
    pub pre: Vec<StepDescriptor>,
    #[serde(default)]
    pub post: Vec<StepDescriptor>,
}

impl RunConfig {
    pub fn stop_command(&self) -> StopCommand {
        match self.stop.as_deref().filter(|line| !line.is_empty()) {
            Some(line) => StopCommand::Stdin(line.to_string()),
            None => StopCommand::Signal(self.stop_code.unwrap_or(DEFAULT_STOP_SIGNAL)),
        }
    }
}
