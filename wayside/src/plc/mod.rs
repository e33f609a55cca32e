//! Relay logic program: a closed boolean language over block occupancy.
//!
//! A program is a list of rules, one per driven output. Each rule is a
//! cascade of `(value, condition)` arms tried in order, ending in an
//! unconditional `else` value, so every output has exactly one value for
//! every occupancy snapshot.

pub mod parser;

use std::collections::{BTreeSet, HashSet};

use crate::error::EngineError;
use crate::input::layout::BlockId;
use crate::railway::registry::{BlockRegistry, ProposedChange, Setting, Attribute};

#[derive(Debug, Clone, PartialEq)]
pub enum BlockSet {
    One(BlockId),
    List(Vec<BlockId>),
    Span(BlockId, BlockId),
}

impl BlockSet {
    fn any_occupied(&self, occupied: &BTreeSet<BlockId>) -> bool {
        match *self {
            BlockSet::One(b) => occupied.contains(&b),
            BlockSet::List(ref l) => l.iter().any(|b| occupied.contains(b)),
            BlockSet::Span(a, b) => occupied.range(a.min(b)..=a.max(b)).next().is_some(),
        }
    }

    /// First referenced block the registry does not manage. A span is
    /// judged by its ends, since the partition is contiguous.
    fn outside(&self, registry: &BlockRegistry) -> Option<BlockId> {
        match *self {
            BlockSet::One(b) => Some(b).filter(|b| !registry.contains(*b)),
            BlockSet::List(ref l) => l.iter().cloned().find(|b| !registry.contains(*b)),
            BlockSet::Span(a, b) => {
                let partition = registry.partition();
                [a, b].iter().cloned().find(|x| !partition.contains(*x))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(bool),
    Occupied(BlockSet),
    Clear(BlockSet),
    Not(Box<Expr>),
    All(Vec<Expr>),
    Any(Vec<Expr>),
}

impl Expr {
    pub fn eval(&self, occupied: &BTreeSet<BlockId>) -> bool {
        match *self {
            Expr::Const(x) => x,
            Expr::Occupied(ref s) => s.any_occupied(occupied),
            Expr::Clear(ref s) => !s.any_occupied(occupied),
            Expr::Not(ref e) => !e.eval(occupied),
            Expr::All(ref es) => es.iter().all(|e| e.eval(occupied)),
            Expr::Any(ref es) => es.iter().any(|e| e.eval(occupied)),
        }
    }

    fn outside(&self, registry: &BlockRegistry) -> Option<BlockId> {
        match *self {
            Expr::Const(_) => None,
            Expr::Occupied(ref s) | Expr::Clear(ref s) => s.outside(registry),
            Expr::Not(ref e) => e.outside(registry),
            Expr::All(ref es) | Expr::Any(ref es) => es.iter().filter_map(|e| e.outside(registry)).next(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub block: BlockId,
    pub arms: Vec<(Setting, Expr)>,
    pub otherwise: Setting,
}

impl Rule {
    pub fn attribute(&self) -> Attribute { self.otherwise.attribute() }

    pub fn eval(&self, occupied: &BTreeSet<BlockId>) -> Setting {
        for &(value, ref cond) in &self.arms {
            if cond.eval(occupied) {
                return value;
            }
        }
        self.otherwise
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub name: Option<String>,
    pub rules: Vec<Rule>,
}

impl Program {
    /// Desired value of every driven output. Depends on nothing but
    /// `occupied`.
    pub fn evaluate(&self, occupied: &BTreeSet<BlockId>) -> Vec<ProposedChange> {
        self.rules.iter()
            .map(|r| ProposedChange::new(r.block, r.eval(occupied)))
            .collect()
    }

    /// Every referenced block must be managed by `registry`, every output
    /// must exist on its block, and no output may be driven twice.
    pub fn validate(&self, registry: &BlockRegistry) -> Result<(), EngineError> {
        let mut driven = HashSet::new();
        for rule in &self.rules {
            let attribute = rule.attribute();
            if rule.arms.iter().any(|&(v, _)| v.attribute() != attribute) {
                return Err(EngineError::InvalidProgram(
                    format!("rule for block {} mixes {:?} with other outputs", rule.block, attribute)));
            }
            let block = registry.get(rule.block).map_err(|_| EngineError::InvalidProgram(
                format!("output block {} is outside partition {:?}", rule.block, registry.partition())))?;
            if attribute == Attribute::Occupancy || !block.has(attribute) {
                return Err(EngineError::InvalidProgram(
                    format!("block {} has no {:?} to drive", rule.block, attribute)));
            }
            if !driven.insert((rule.block, attribute)) {
                return Err(EngineError::InvalidProgram(
                    format!("{:?} of block {} is driven twice", attribute, rule.block)));
            }
            if let Some(b) = rule.arms.iter().filter_map(|&(_, ref cond)| cond.outside(registry)).next() {
                return Err(EngineError::InvalidProgram(
                    format!("rule for block {} reads block {} outside partition {:?}",
                            rule.block, b, registry.partition())));
            }
        }
        Ok(())
    }
}
