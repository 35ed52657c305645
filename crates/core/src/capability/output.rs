//! Raw output shapes, one per agent role.
//!
//! These are the payloads a capability hands back before normalization.
//! The set is closed: the normalizer knows exactly how to wrap each variant,
//! so there is no structural guessing downstream.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capability::AgentRole;
use crate::normalize::MetricValue;

/// One titled section of a prose document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProseSection {
    pub title: String,
    pub body: String,
}

/// Narrative output from the ideation, documentation, and review agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProseDoc {
    /// Short standalone summary.
    pub summary: String,
    /// Optional titled sections expanding on the summary.
    #[serde(default)]
    pub sections: Vec<ProseSection>,
}

/// Generated or rewritten source files, keyed by path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CodeSet {
    pub files: BTreeMap<String, String>,
}

/// Findings from the analysis agents: a narrative summary plus scored findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Assessment {
    pub summary: String,
    #[serde(default)]
    pub findings: BTreeMap<String, MetricValue>,
}

/// Raw agent output, one variant per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "agent", content = "output", rename_all = "snake_case")]
pub enum AgentOutput {
    Ideation(ProseDoc),
    CodeGeneration(CodeSet),
    Optimization(CodeSet),
    SecurityAnalysis(Assessment),
    TestGeneration(Assessment),
    Documentation(ProseDoc),
    Review(ProseDoc),
}

impl AgentOutput {
    /// The role this output claims to come from.
    pub fn role(&self) -> AgentRole {
        match self {
            AgentOutput::Ideation(_) => AgentRole::Ideation,
            AgentOutput::CodeGeneration(_) => AgentRole::CodeGeneration,
            AgentOutput::Optimization(_) => AgentRole::Optimization,
            AgentOutput::SecurityAnalysis(_) => AgentRole::SecurityAnalysis,
            AgentOutput::TestGeneration(_) => AgentRole::TestGeneration,
            AgentOutput::Documentation(_) => AgentRole::Documentation,
            AgentOutput::Review(_) => AgentRole::Review,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_serialization_tags_agent() {
        let output = AgentOutput::Ideation(ProseDoc {
            summary: "a todo app with tags".to_string(),
            sections: vec![],
        });
        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"agent\":\"ideation\""));
        assert!(json.contains("a todo app with tags"));
    }

    #[test]
    fn test_output_role() {
        let output = AgentOutput::SecurityAnalysis(Assessment {
            summary: "ok".to_string(),
            findings: BTreeMap::new(),
        });
        assert_eq!(output.role(), AgentRole::SecurityAnalysis);
    }
}
