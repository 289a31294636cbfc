//! Model routing table.
//!
//! Each logical model identifier maps to the binary that serves it, the model
//! string passed on its command line, the price table used when the vendor
//! does not report a cost, and the tool allow-lists for both task categories.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigurationError;
use crate::error::Result;
use crate::error::TetherErr;

const DEFAULT_READ_ONLY_TOOLS: &[&str] = &["Read", "Glob", "Grep", "LS", "WebFetch", "WebSearch"];
const DEFAULT_ESCALATED_EXTRA_TOOLS: &[&str] = &["Write", "Edit", "MultiEdit", "Bash"];

/// Permission tier, fixed for the lifetime of a spawned process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    #[default]
    ReadOnly,
    Escalated,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub models: BTreeMap<String, ModelConfig>,
}

impl Config {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|err| TetherErr::Config(err.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|err| TetherErr::Config(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&contents)
    }

    /// Resolves a logical model identifier to its concrete configuration.
    pub fn route(&self, model_id: &str) -> std::result::Result<&ModelConfig, ConfigurationError> {
        self.models
            .get(model_id)
            .ok_or_else(|| ConfigurationError::UnknownModel(model_id.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelConfig {
    pub binary: String,
    pub model: String,
    #[serde(default)]
    pub rates: CostRates,
    #[serde(default)]
    pub tools: ToolAllowLists,
}

impl ModelConfig {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            rates: CostRates::default(),
            tools: ToolAllowLists::default(),
        }
    }

    pub fn with_rates(mut self, rates: CostRates) -> Self {
        self.rates = rates;
        self
    }

    pub fn with_tools(mut self, tools: ToolAllowLists) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ToolAllowLists {
    pub read_only: Vec<String>,
    pub escalated: Vec<String>,
}

impl ToolAllowLists {
    pub fn for_category(&self, category: TaskCategory) -> &[String] {
        match category {
            TaskCategory::ReadOnly => &self.read_only,
            TaskCategory::Escalated => &self.escalated,
        }
    }
}

impl Default for ToolAllowLists {
    fn default() -> Self {
        let read_only: Vec<String> = DEFAULT_READ_ONLY_TOOLS
            .iter()
            .map(|tool| (*tool).to_string())
            .collect();
        let escalated = read_only
            .iter()
            .cloned()
            .chain(
                DEFAULT_ESCALATED_EXTRA_TOOLS
                    .iter()
                    .map(|tool| (*tool).to_string()),
            )
            .collect();
        Self {
            read_only,
            escalated,
        }
    }
}

/// Per-token prices for each token category.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CostRates {
    #[serde(default)]
    pub input: Option<Price>,
    #[serde(default)]
    pub output: Option<Price>,
    #[serde(default)]
    pub cache_write: Option<Price>,
    #[serde(default)]
    pub cache_read: Option<Price>,
}

/// A price written either as a bare number or as a decimal string with an
/// optional currency prefix, e.g. `"$0.000003"` or `"USD 0.000003"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Price {
    Number(f64),
    Text(String),
}

impl Price {
    pub fn value(&self) -> Option<f64> {
        match self {
            Price::Number(value) => Some(*value),
            Price::Text(text) => parse_price(text),
        }
    }
}

impl From<f64> for Price {
    fn from(value: f64) -> Self {
        Price::Number(value)
    }
}

impl From<&str> for Price {
    fn from(value: &str) -> Self {
        Price::Text(value.to_string())
    }
}

fn parse_price(text: &str) -> Option<f64> {
    let numeric = text
        .trim()
        .trim_start_matches(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .trim();
    numeric.replace(',', "").parse::<f64>().ok()
}
