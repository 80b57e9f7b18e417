//! Config flow surface types
//!
//! What a flow step hands back to the UI or CLI driving it, and the errors a
//! step can raise.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::manager::ConfigEntriesError;

/// Kind of a flow step result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowResultType {
    /// Show a form and wait for input
    Form,
    /// A background task is running, poll again later
    Progress,
    /// The background task finished, continue with `step_id`
    ProgressDone,
    /// The flow finished and produced data
    CreateEntry,
    /// The flow ended without producing data
    Abort,
}

/// Form field schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FormField {
    pub fn required(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, field_type: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }
}

/// Result of a config flow step
#[derive(Debug, Clone, Serialize)]
pub struct FlowResult {
    /// Filled in by the flow manager
    pub flow_id: String,
    /// Integration domain, filled in by the flow manager
    pub handler: String,
    #[serde(rename = "type")]
    pub result_type: FlowResultType,
    /// Step shown (form/progress) or to continue with (progress_done)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    pub data_schema: Vec<FormField>,
    /// Error codes keyed by field name, `base` for the whole form
    pub errors: Option<HashMap<String, String>>,
    pub description_placeholders: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Abort reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Entry data (create_entry)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Id of the entry created from this result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
}

impl FlowResult {
    fn new(result_type: FlowResultType) -> Self {
        Self {
            flow_id: String::new(),
            handler: String::new(),
            result_type,
            step_id: None,
            data_schema: Vec::new(),
            errors: None,
            description_placeholders: None,
            progress_action: None,
            title: None,
            reason: None,
            data: None,
            entry_id: None,
        }
    }

    pub fn form(step_id: &str, data_schema: Vec<FormField>) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            data_schema,
            ..Self::new(FlowResultType::Form)
        }
    }

    pub fn progress(step_id: &str, progress_action: &str) -> Self {
        Self {
            step_id: Some(step_id.to_string()),
            progress_action: Some(progress_action.to_string()),
            ..Self::new(FlowResultType::Progress)
        }
    }

    pub fn progress_done(next_step_id: &str) -> Self {
        Self {
            step_id: Some(next_step_id.to_string()),
            ..Self::new(FlowResultType::ProgressDone)
        }
    }

    pub fn create_entry(title: &str, data: Value) -> Self {
        Self {
            title: Some(title.to_string()),
            data: Some(data),
            ..Self::new(FlowResultType::CreateEntry)
        }
    }

    pub fn abort(reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::new(FlowResultType::Abort)
        }
    }

    /// Attach a `base` error to a form
    pub fn with_base_error(mut self, code: &str) -> Self {
        let mut errors = HashMap::new();
        errors.insert("base".to_string(), code.to_string());
        self.errors = Some(errors);
        self
    }

    pub fn with_placeholder(mut self, key: &str, value: impl Into<String>) -> Self {
        self.description_placeholders
            .get_or_insert_with(HashMap::new)
            .insert(key.to_string(), value.into());
        self
    }

    /// Whether the flow ends with this result
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.result_type,
            FlowResultType::CreateEntry | FlowResultType::Abort
        )
    }

    /// Base error code of a form, if any
    pub fn base_error(&self) -> Option<&str> {
        self.errors
            .as_ref()
            .and_then(|e| e.get("base"))
            .map(String::as_str)
    }
}

/// Abort reason when another flow of the domain got there first
pub const ALREADY_IN_PROGRESS: &str = "already_in_progress";

/// Abort reason when an entry already holds the flow's unique id
pub const ALREADY_CONFIGURED: &str = "already_configured";

/// Errors raised by flow steps and the flow manager
#[derive(Debug, Error)]
pub enum FlowError {
    /// Ends the flow with an abort result carrying `reason`
    #[error("Flow aborted: {reason}")]
    Abort { reason: String },

    #[error("Flow not found: {0}")]
    UnknownFlow(String),

    #[error("Unknown step: {0}")]
    UnknownStep(String),

    #[error("Invalid input for step {step}: {message}")]
    InvalidInput { step: String, message: String },

    #[error(transparent)]
    Entries(#[from] ConfigEntriesError),
}

impl FlowError {
    pub fn abort(reason: &str) -> Self {
        FlowError::Abort {
            reason: reason.to_string(),
        }
    }

    /// Parse a step's user input into its typed form
    pub fn parse_input<T: serde::de::DeserializeOwned>(
        step: &str,
        input: Value,
    ) -> Result<T, FlowError> {
        serde_json::from_value(input).map_err(|e| FlowError::InvalidInput {
            step: step.to_string(),
            message: e.to_string(),
        })
    }
}
