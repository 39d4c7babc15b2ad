use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::Error;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Account {
    /// Internal id; the wire object carries it only through its URL.
    #[serde(skip)]
    pub id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact: Vec<String>,
    pub key: super::jose::JWK,
    pub orders: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    #[serde(rename = "valid")]
    Valid,
    #[serde(rename = "deactivated")]
    Deactivated,
    #[serde(rename = "revoked")]
    Revoked,
}

impl Default for Status {
    fn default() -> Status {
        Status::Valid
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Status::Valid => "valid",
            Status::Deactivated => "deactivated",
            Status::Revoked => "revoked",
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct NewAccountRequest {
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed", default)]
    pub terms_of_service_agreed: bool,
    #[serde(rename = "onlyReturnExisting", default)]
    pub only_return_existing: bool,
}

fn validate_contacts(contacts: &[String]) -> Result<(), Error> {
    for contact in contacts {
        if contact.is_empty() {
            return Err(Error::malformed("contact cannot be empty string"));
        }
    }
    Ok(())
}

impl NewAccountRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.only_return_existing {
            if !self.contact.is_empty() || self.terms_of_service_agreed {
                return Err(Error::malformed(
                    "incompatible input; onlyReturnExisting must be alone",
                ));
            }
            return Ok(());
        }
        validate_contacts(&self.contact)
    }
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl UpdateAccountRequest {
    pub fn validate(&self) -> Result<(), Error> {
        match &self.status {
            Some(status) => {
                if !self.contact.is_empty() {
                    return Err(Error::malformed(
                        "incompatible input; contact and status updates are mutually exclusive",
                    ));
                }
                if status != "deactivated" {
                    return Err(Error::malformed(format!(
                        "cannot update account status to {}, only deactivated",
                        status
                    )));
                }
                Ok(())
            }
            None => validate_contacts(&self.contact),
        }
    }

    pub fn is_deactivation(&self) -> bool {
        self.status.as_deref() == Some("deactivated")
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct KeyChangeRequest {
    pub account: String,
    #[serde(rename = "oldKey")]
    pub old_key: super::jose::JWK,
}
