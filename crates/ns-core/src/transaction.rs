use crate::config::EngineConfig;
use crate::error::NftError;
use crate::objects::{Object, Rule};
use crate::types::Family;
use crate::util::split_comment;
use crate::verb::Verb;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single queued (verb, object) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub verb: Verb,
    pub object: Object,
}

/// An ordered batch of operations, applied all-or-nothing by an engine.
///
/// The first malformed object poisons the transaction: the error is kept and every
/// later call is ignored, so the caller always sees the earliest problem.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    family: Option<Family>,
    table: Option<String>,
    emulate_destroy: bool,
    operations: Vec<Operation>,
    err: Option<NftError>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transaction that inherits the engine's default family/table and destroy handling
    pub fn for_config(config: &EngineConfig) -> Self {
        Self {
            family: config.family,
            table: config.table.clone(),
            emulate_destroy: config.emulate_destroy,
            ..Self::default()
        }
    }

    pub fn add(&mut self, object: impl Into<Object>) {
        self.push(Verb::Add, object.into());
    }

    pub fn create(&mut self, object: impl Into<Object>) {
        self.push(Verb::Create, object.into());
    }

    pub fn insert(&mut self, object: impl Into<Object>) {
        self.push(Verb::Insert, object.into());
    }

    pub fn replace(&mut self, object: impl Into<Object>) {
        self.push(Verb::Replace, object.into());
    }

    pub fn delete(&mut self, object: impl Into<Object>) {
        self.push(Verb::Delete, object.into());
    }

    pub fn destroy(&mut self, object: impl Into<Object>) {
        self.push(Verb::Destroy, object.into());
    }

    pub fn flush(&mut self, object: impl Into<Object>) {
        self.push(Verb::Flush, object.into());
    }

    pub fn reset(&mut self, object: impl Into<Object>) {
        self.push(Verb::Reset, object.into());
    }

    /// Queue an operation with an explicit verb
    pub fn operation(&mut self, verb: Verb, object: impl Into<Object>) {
        self.push(verb, object.into());
    }

    /// Add a rule to `chain`, splitting a trailing `comment "..."` off the rule text
    pub fn add_rule(&mut self, chain: impl Into<String>, rule: &str) {
        let (body, comment) = split_comment(rule);
        self.add(Rule {
            chain: chain.into(),
            rule: body,
            comment,
            ..Rule::default()
        });
    }

    fn push(&mut self, verb: Verb, mut object: Object) {
        if self.err.is_some() {
            return;
        }

        object.apply_defaults(self.family, self.table.as_deref());
        if let Err(err) = object.validate(verb) {
            tracing::debug!("rejecting {} {}: {}", verb, object.kind(), err);
            self.err = Some(err);
            return;
        }

        if verb == Verb::Destroy && self.emulate_destroy {
            self.operations.push(Operation {
                verb: Verb::Add,
                object: object.clone(),
            });
            self.operations.push(Operation {
                verb: Verb::Delete,
                object,
            });
        } else {
            self.operations.push(Operation { verb, object });
        }
    }

    pub fn num_operations(&self) -> usize {
        self.operations.len()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The error that poisoned this transaction, if any
    pub fn err(&self) -> Option<&NftError> {
        self.err.as_ref()
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.operations {
            op.object.write_operation(op.verb, f)?;
        }
        Ok(())
    }
}
