use crate::types::Family;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// An nft define (as with `nft -D name=value`), referenced as `$name` in object bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Define {
    pub name: String,
    pub value: String,
}

impl Define {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Engine settings: the table the engine is bound to, destroy handling, and defines
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub family: Option<Family>,
    #[serde(default)]
    pub table: Option<String>,
    /// Run `destroy` as `add` followed by `delete`, for backends without native destroy
    #[serde(default)]
    pub emulate_destroy: bool,
    #[serde(default)]
    pub defines: Vec<Define>,
}

impl EngineConfig {
    /// Config bound to a single table
    pub fn for_table(family: Family, table: impl Into<String>) -> Self {
        Self {
            family: Some(family),
            table: Some(table.into()),
            ..Self::default()
        }
    }

    pub fn with_emulated_destroy(mut self, emulate: bool) -> Self {
        self.emulate_destroy = emulate;
        self
    }

    pub fn with_define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push(Define::new(name, value));
        self
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse engine config YAML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config from {:?}", path))?;
        Self::from_yaml(&content)
    }

    /// Family defaults followed by the configured defines
    pub fn effective_defines(&self) -> Vec<Define> {
        let mut defines = match self.family {
            Some(Family::Ip) => vec![Define::new("IP", "ip"), Define::new("INET_ADDR", "ipv4_addr")],
            Some(Family::Ip6) => vec![Define::new("IP", "ip6"), Define::new("INET_ADDR", "ipv6_addr")],
            _ => vec![],
        };
        defines.extend(self.defines.iter().cloned());
        defines
    }
}
