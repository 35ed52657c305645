//! # Result Normalizer
//!
//! Maps raw agent output into the stable, kind-tagged [`ResultEnvelope`]
//! that downstream consumers dispatch on. The mapping is fixed per agent
//! role; an output that does not fit its role's shape is a
//! [`AgentFailure::MalformedOutput`], never a silent default.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capability::{AgentOutput, AgentRole, Assessment, CodeSet, ProseDoc};
use crate::error::AgentFailure;

/// A single metric value: numeric score or short textual grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

/// Normalized step output.
///
/// The `kind` tag fully determines the payload shape, so consumers switch on
/// the variant instead of probing structure. Serializes as
/// `{"kind": ..., "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ResultEnvelope {
    /// Source files keyed by path. Always carries at least one entry.
    Code(BTreeMap<String, String>),
    /// A text blob.
    Prose(String),
    /// Named metric values.
    Metrics(BTreeMap<String, MetricValue>),
    /// Ordered nested envelopes.
    Composite(Vec<ResultEnvelope>),
}

/// Discriminant of a [`ResultEnvelope`], for dispatch and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Code,
    Prose,
    Metrics,
    Composite,
}

impl ResultEnvelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            ResultEnvelope::Code(_) => EnvelopeKind::Code,
            ResultEnvelope::Prose(_) => EnvelopeKind::Prose,
            ResultEnvelope::Metrics(_) => EnvelopeKind::Metrics,
            ResultEnvelope::Composite(_) => EnvelopeKind::Composite,
        }
    }

    /// The file map carried by this envelope, descending into composites.
    ///
    /// Returns the first `Code` payload found in order.
    pub fn code_files(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ResultEnvelope::Code(files) => Some(files),
            ResultEnvelope::Composite(parts) => parts.iter().find_map(ResultEnvelope::code_files),
            _ => None,
        }
    }

    /// All prose carried by this envelope, in order, joined by blank lines.
    pub fn prose_text(&self) -> Option<String> {
        fn collect<'a>(envelope: &'a ResultEnvelope, out: &mut Vec<&'a str>) {
            match envelope {
                ResultEnvelope::Prose(text) => out.push(text),
                ResultEnvelope::Composite(parts) => {
                    for part in parts {
                        collect(part, out);
                    }
                }
                _ => {}
            }
        }
        let mut parts = Vec::new();
        collect(self, &mut parts);
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}

/// Normalize raw agent output for the role the step is bound to.
///
/// Deterministic: the same output always yields the same envelope. The role
/// check catches a capability answering with the wrong variant.
pub fn normalize(role: AgentRole, output: AgentOutput) -> Result<ResultEnvelope, AgentFailure> {
    if output.role() != role {
        return Err(AgentFailure::MalformedOutput(format!(
            "expected {} output, got {}",
            role.agent_name(),
            output.role().agent_name()
        )));
    }
    match output {
        AgentOutput::Ideation(doc) | AgentOutput::Documentation(doc) | AgentOutput::Review(doc) => {
            prose_envelope(doc)
        }
        AgentOutput::CodeGeneration(code) | AgentOutput::Optimization(code) => code_envelope(code),
        AgentOutput::SecurityAnalysis(assessment) | AgentOutput::TestGeneration(assessment) => {
            assessment_envelope(assessment)
        }
    }
}

/// Prose roles: a bare summary stays `Prose`; titled sections become a
/// `Composite` of prose parts, summary first.
fn prose_envelope(doc: ProseDoc) -> Result<ResultEnvelope, AgentFailure> {
    let has_summary = !doc.summary.trim().is_empty();
    if !has_summary && doc.sections.is_empty() {
        return Err(AgentFailure::MalformedOutput(
            "prose output carried neither summary nor sections".to_string(),
        ));
    }
    if doc.sections.is_empty() {
        return Ok(ResultEnvelope::Prose(doc.summary));
    }
    let mut parts = Vec::with_capacity(doc.sections.len() + 1);
    if has_summary {
        parts.push(ResultEnvelope::Prose(doc.summary));
    }
    for section in doc.sections {
        parts.push(ResultEnvelope::Prose(format!(
            "# {}\n\n{}",
            section.title, section.body
        )));
    }
    Ok(ResultEnvelope::Composite(parts))
}

/// Code roles: the file map, which must not be empty.
fn code_envelope(code: CodeSet) -> Result<ResultEnvelope, AgentFailure> {
    if code.files.is_empty() {
        return Err(AgentFailure::MalformedOutput(
            "code output carried no files".to_string(),
        ));
    }
    Ok(ResultEnvelope::Code(code.files))
}

/// Analysis roles: a prose summary bundled with the scored findings.
fn assessment_envelope(assessment: Assessment) -> Result<ResultEnvelope, AgentFailure> {
    if assessment.summary.trim().is_empty() {
        return Err(AgentFailure::MalformedOutput(
            "assessment output carried no summary".to_string(),
        ));
    }
    Ok(ResultEnvelope::Composite(vec![
        ResultEnvelope::Prose(assessment.summary),
        ResultEnvelope::Metrics(assessment.findings),
    ]))
}
