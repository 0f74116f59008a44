//! Vocabulary shared between the ERP queue and the ERP transport.

use serde::{Deserialize, Serialize};

/// Error returned when parsing one of the ERP enums from its wire name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl std::fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Operation requested from the ERP for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErpOperation {
    UpsertDocument,
    PostDocument,
    CancelDocument,
}

impl ErpOperation {
    /// Returns the wire name of the operation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErpOperation::UpsertDocument => "UpsertDocument",
            ErpOperation::PostDocument => "PostDocument",
            ErpOperation::CancelDocument => "CancelDocument",
        }
    }
}

impl std::fmt::Display for ErpOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ErpOperation {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UpsertDocument" => Ok(ErpOperation::UpsertDocument),
            "PostDocument" => Ok(ErpOperation::PostDocument),
            "CancelDocument" => Ok(ErpOperation::CancelDocument),
            other => Err(ParseEnumError {
                kind: "ERP operation",
                value: other.to_string(),
            }),
        }
    }
}

/// Document status as reported by the ERP, mapped to the portal's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DocumentStatus {
    #[default]
    None,
    Accepted,
    Posted,
    Error,
}

impl DocumentStatus {
    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::None => "None",
            DocumentStatus::Accepted => "Accepted",
            DocumentStatus::Posted => "Posted",
            DocumentStatus::Error => "Error",
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(DocumentStatus::None),
            "Accepted" => Ok(DocumentStatus::Accepted),
            "Posted" => Ok(DocumentStatus::Posted),
            "Error" => Ok(DocumentStatus::Error),
            other => Err(ParseEnumError {
                kind: "document status",
                value: other.to_string(),
            }),
        }
    }
}
