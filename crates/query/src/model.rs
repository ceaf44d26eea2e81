use cachecore_primitives::KeyName;
use cachecore_schema::KeyValue;
use serde::{Deserialize, Serialize};

/// A comparison an atomic predicate can apply against a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// Value is a member of the operand set.
    In,
    /// The key is a list-index and one of its elements equals the operand.
    Contains,
}

impl Op {
    pub fn is_range(&self) -> bool {
        matches!(self, Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }
}

/// The right-hand side of a predicate: one value, or a set of them (`in`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    Scalar(KeyValue),
    Set(Vec<KeyValue>),
}

impl Operand {
    pub fn as_scalar(&self) -> Option<&KeyValue> {
        match self {
            Operand::Scalar(v) => Some(v),
            Operand::Set(_) => None,
        }
    }

    pub fn as_set(&self) -> &[KeyValue] {
        match self {
            Operand::Scalar(v) => std::slice::from_ref(v),
            Operand::Set(values) => values,
        }
    }
}

/// One atomic test: `key op operand`, e.g. `folder = "aaa"` or `qty between 1 and 10`
/// (expressed as two predicates, `qty >= 1` and `qty <= 10`, in the same block).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub key: KeyName,
    pub op: Op,
    pub operand: Operand,
}

impl Predicate {
    pub fn new(key: impl Into<KeyName>, op: Op, operand: Operand) -> Self {
        Self {
            key: key.into(),
            op,
            operand,
        }
    }

    pub fn eq(key: impl Into<KeyName>, value: KeyValue) -> Self {
        Self::new(key, Op::Eq, Operand::Scalar(value))
    }

    pub fn r#in(key: impl Into<KeyName>, values: Vec<KeyValue>) -> Self {
        Self::new(key, Op::In, Operand::Set(values))
    }

    pub fn contains(key: impl Into<KeyName>, value: KeyValue) -> Self {
        Self::new(key, Op::Contains, Operand::Scalar(value))
    }
}

/// A conjunction of predicates: every one of them must hold for a record to
/// match this block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AndBlock {
    pub predicates: Vec<Predicate>,
}

impl AndBlock {
    pub fn new(predicates: Vec<Predicate>) -> Self {
        Self { predicates }
    }
}

/// A query: the union of every and-block's matches, de-duplicated.
///
/// An empty `or_blocks` (no blocks at all) matches nothing; a single block
/// with no predicates matches every record of the type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub or_blocks: Vec<AndBlock>,
}

impl Query {
    pub fn new(or_blocks: Vec<AndBlock>) -> Self {
        Self { or_blocks }
    }

    pub fn match_all() -> Self {
        Self {
            or_blocks: vec![AndBlock::default()],
        }
    }
}
