use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct List {
    pub orders: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Order {
    #[serde(skip)]
    pub id: String,
    pub status: Status,
    pub expires: DateTime<Utc>,
    pub identifiers: Vec<super::identifier::Identifier>,
    #[serde(rename = "notBefore", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "notAfter", default, skip_serializing_if = "Option::is_none")]
    pub not_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<super::error::Error>,
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "invalid")]
    Invalid,
}

impl Default for Status {
    fn default() -> Status {
        Status::Pending
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Ready => "ready",
            Status::Processing => "processing",
            Status::Valid => "valid",
            Status::Invalid => "invalid",
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NewOrderRequest {
    pub identifiers: Vec<super::identifier::Identifier>,
    #[serde(rename = "notBefore", default)]
    pub not_before: Option<DateTime<Utc>>,
    #[serde(rename = "notAfter", default)]
    pub not_after: Option<DateTime<Utc>>,
}

impl NewOrderRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.identifiers.is_empty() {
            return Err(Error::malformed("identifiers list cannot be empty"));
        }
        for identifier in &self.identifiers {
            if super::identifier::Type::from_str(&identifier.id_type).is_none() {
                return Err(Error::unsupported_identifier(format!(
                    "identifier type '{}' is not supported",
                    identifier.id_type
                ))
                .with_identifier(identifier.clone()));
            }
            if identifier.base_value().is_empty() {
                return Err(Error::malformed("identifier value cannot be empty")
                    .with_identifier(identifier.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct FinalizeRequest {
    pub csr: String,
}
