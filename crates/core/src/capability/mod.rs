//! # Agent Capabilities
//!
//! The uniform contract every specialized agent implements. The engine
//! assembles a [`StepInput`] from the run context, invokes the capability,
//! and hands its [`AgentOutput`] to the normalizer. Capabilities are pure
//! with respect to run state: their only effect is their return value.
//!
//! ## Roles
//!
//! The agent set is closed, one role per pipeline specialty:
//!
//! - `Ideation` - turn a description into a concept
//! - `CodeGeneration` - produce source files from the concept
//! - `Optimization` - rewrite code for quality/performance
//! - `SecurityAnalysis` - score code for vulnerabilities
//! - `TestGeneration` - produce a test assessment for code
//! - `Documentation` - write docs for code
//! - `Review` - critique code or a concept

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentFailure;
use crate::normalize::ResultEnvelope;

pub mod output;

pub use output::{AgentOutput, Assessment, CodeSet, ProseDoc, ProseSection};

/// The closed set of agent roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Ideation,
    CodeGeneration,
    Optimization,
    SecurityAnalysis,
    TestGeneration,
    Documentation,
    Review,
}

impl AgentRole {
    /// All roles, in pipeline order.
    pub fn all() -> Vec<AgentRole> {
        vec![
            AgentRole::Ideation,
            AgentRole::CodeGeneration,
            AgentRole::Optimization,
            AgentRole::SecurityAnalysis,
            AgentRole::TestGeneration,
            AgentRole::Documentation,
            AgentRole::Review,
        ]
    }

    /// Stable wire name, also recorded as `StepRecord.agent_name`.
    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentRole::Ideation => "ideation",
            AgentRole::CodeGeneration => "code_generation",
            AgentRole::Optimization => "optimization",
            AgentRole::SecurityAnalysis => "security_analysis",
            AgentRole::TestGeneration => "test_generation",
            AgentRole::Documentation => "documentation",
            AgentRole::Review => "review",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_name())
    }
}

/// One value in a step input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    /// A plain text value (seed keys, projected prose).
    Text(String),
    /// Source files keyed by path.
    Files(BTreeMap<String, String>),
    /// A prior step's full normalized envelope.
    Envelope(ResultEnvelope),
}

/// Typed input assembled by the engine for one capability invocation.
///
/// Accessors return [`AgentFailure::InvalidInput`] for a missing or
/// wrongly-typed key, so implementations propagate with `?` instead of
/// panicking on contract violations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepInput {
    values: BTreeMap<String, InputValue>,
}

impl StepInput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used by derivation and tests.
    pub fn with(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: InputValue) {
        self.values.insert(name.into(), value);
    }

    pub fn text(&self, name: &str) -> Result<&str, AgentFailure> {
        match self.values.get(name) {
            Some(InputValue::Text(text)) => Ok(text),
            _ => Err(AgentFailure::InvalidInput(name.to_string())),
        }
    }

    pub fn files(&self, name: &str) -> Result<&BTreeMap<String, String>, AgentFailure> {
        match self.values.get(name) {
            Some(InputValue::Files(files)) => Ok(files),
            _ => Err(AgentFailure::InvalidInput(name.to_string())),
        }
    }

    pub fn envelope(&self, name: &str) -> Result<&ResultEnvelope, AgentFailure> {
        match self.values.get(name) {
            Some(InputValue::Envelope(envelope)) => Ok(envelope),
            _ => Err(AgentFailure::InvalidInput(name.to_string())),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The invoke contract an agent backend satisfies.
///
/// An invocation represents a remote call and may run for seconds to
/// minutes. The engine imposes the timeout by racing this future against a
/// deadline and dropping it on expiry, so implementations must be
/// cancel-safe: dropping the future mid-flight must not corrupt anything
/// the implementation owns.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    async fn invoke(&self, input: StepInput) -> Result<AgentOutput, AgentFailure>;
}
