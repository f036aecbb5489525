//! Program locations that guards and graph inputs are keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a traced value came from in the user program.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Local(String),
    Global(String),
    Attr { base: Box<Source>, member: String },
    GetItem { base: Box<Source>, index: usize },
}

impl Source {
    pub fn local(name: impl Into<String>) -> Self {
        Source::Local(name.into())
    }

    pub fn global(name: impl Into<String>) -> Self {
        Source::Global(name.into())
    }

    /// `self.member`
    pub fn attr(&self, member: impl Into<String>) -> Self {
        Source::Attr {
            base: Box::new(self.clone()),
            member: member.into(),
        }
    }

    /// `self[index]`
    pub fn item(&self, index: usize) -> Self {
        Source::GetItem {
            base: Box::new(self.clone()),
            index,
        }
    }

    /// Python expression that re-reads the value at guard time.
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(name) => write!(f, "{name}"),
            Source::Global(name) => write!(f, "G[{name:?}]"),
            Source::Attr { base, member } => write!(f, "{base}.{member}"),
            Source::GetItem { base, index } => write!(f, "{base}[{index}]"),
        }
    }
}
