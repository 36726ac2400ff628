//! Filter Pipeline
//!
//! Pre-save capture predicates. Every predicate must pass (logical AND) for
//! an in-scope exchange to reach the sink. Filters gate persistence only;
//! relaying is never affected. Snapshots swap atomically on reload, same as
//! scope rules.

use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::exchange::Exchange;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid regex {pattern:?} in capture rule: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("capture rule on {field:?} requires a numeric value, got {value:?}")]
    NonNumericStatus { field: FilterField, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Method,
    Host,
    Path,
    Status,
    Tool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Equals,
    NotEquals,
    Contains,
    /// Regex match.
    Matches,
}

/// One capture predicate over exchange fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureRule {
    pub field: FilterField,
    pub op: FilterOp,
    pub value: String,
}

enum CompiledOp {
    Equals(String),
    NotEquals(String),
    Contains(String),
    Matches(Regex),
}

struct CompiledRule {
    field: FilterField,
    op: CompiledOp,
}

/// Compiled capture pipeline; an empty pipeline admits everything.
pub struct CapturePipeline {
    rules: Vec<CompiledRule>,
}

impl CapturePipeline {
    pub fn compile(rules: &[CaptureRule]) -> Result<Self, FilterError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.field == FilterField::Status
                && matches!(rule.op, FilterOp::Equals | FilterOp::NotEquals)
                && rule.value.parse::<u16>().is_err()
            {
                return Err(FilterError::NonNumericStatus {
                    field: rule.field,
                    value: rule.value.clone(),
                });
            }
            let op = match rule.op {
                FilterOp::Equals => CompiledOp::Equals(rule.value.clone()),
                FilterOp::NotEquals => CompiledOp::NotEquals(rule.value.clone()),
                FilterOp::Contains => CompiledOp::Contains(rule.value.clone()),
                FilterOp::Matches => CompiledOp::Matches(Regex::new(&rule.value).map_err(|e| {
                    FilterError::InvalidPattern {
                        pattern: rule.value.clone(),
                        reason: e.to_string(),
                    }
                })?),
            };
            compiled.push(CompiledRule {
                field: rule.field,
                op,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// True when every predicate admits the exchange.
    pub fn admits(&self, exchange: &Exchange) -> bool {
        self.rules.iter().all(|rule| {
            let value = field_value(rule.field, exchange);
            match &rule.op {
                CompiledOp::Equals(expected) => value == *expected,
                CompiledOp::NotEquals(expected) => value != *expected,
                CompiledOp::Contains(needle) => value.contains(needle.as_str()),
                CompiledOp::Matches(regex) => regex.is_match(&value),
            }
        })
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

fn field_value(field: FilterField, exchange: &Exchange) -> String {
    match field {
        FilterField::Method => exchange.request.method.clone(),
        FilterField::Host => exchange.host.clone(),
        FilterField::Path => exchange.path().to_string(),
        FilterField::Status => exchange
            .response
            .as_ref()
            .map(|r| r.status.to_string())
            .unwrap_or_default(),
        FilterField::Tool => match exchange.tool {
            crate::exchange::ToolTag::Proxy => "proxy".to_string(),
            crate::exchange::ToolTag::Replay => "replay".to_string(),
            crate::exchange::ToolTag::Fuzzer => "fuzzer".to_string(),
        },
    }
}

/// Shared, atomically swappable capture pipeline.
pub struct FilterHandle {
    current: ArcSwap<CapturePipeline>,
}

impl FilterHandle {
    pub fn new(pipeline: CapturePipeline) -> Self {
        Self {
            current: ArcSwap::from_pointee(pipeline),
        }
    }

    pub fn reload(&self, rules: &[CaptureRule]) -> Result<(), FilterError> {
        let compiled = CapturePipeline::compile(rules)?;
        info!(rules = compiled.rule_count(), "capture pipeline replaced");
        self.current.store(Arc::new(compiled));
        Ok(())
    }

    pub fn snapshot(&self) -> Arc<CapturePipeline> {
        self.current.load_full()
    }
}
