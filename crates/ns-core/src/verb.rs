use crate::error::{NftError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An nft command verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Add,
    Create,
    Insert,
    Replace,
    Delete,
    Destroy,
    Flush,
    Reset,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Create => "create",
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Destroy => "destroy",
            Self::Flush => "flush",
            Self::Reset => "reset",
        }
    }

    /// Verbs that consume a handle value when applied
    pub fn allocates_handle(&self) -> bool {
        matches!(self, Self::Add | Self::Create | Self::Insert)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = NftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "create" => Ok(Self::Create),
            "insert" => Ok(Self::Insert),
            "replace" => Ok(Self::Replace),
            "delete" => Ok(Self::Delete),
            "destroy" => Ok(Self::Destroy),
            "flush" => Ok(Self::Flush),
            "reset" => Ok(Self::Reset),
            other => Err(NftError::validation("verb", format!("unknown verb {:?}", other))),
        }
    }
}
