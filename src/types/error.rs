use serde::{Deserialize, Serialize};

/// RFC 7807 problem document carrying an RFC 8555 error type.
///
/// Serializes directly as the `application/problem+json` body.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Error {
    #[serde(rename = "type")]
    pub error_type: Type,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(rename = "subproblems", default, skip_serializing_if = "Vec::is_empty")]
    pub sub_problems: Vec<Error>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<super::identifier::Identifier>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    #[serde(rename = "urn:ietf:params:acme:error:accountDoesNotExist")]
    AccountDoesNotExist,
    #[serde(rename = "urn:ietf:params:acme:error:accountAlreadyExists")]
    AccountAlreadyExists,
    #[serde(rename = "urn:ietf:params:acme:error:badCSR")]
    BadCSR,
    #[serde(rename = "urn:ietf:params:acme:error:badNonce")]
    BadNonce,
    #[serde(rename = "urn:ietf:params:acme:error:badPublicKey")]
    BadPublicKey,
    #[serde(rename = "urn:ietf:params:acme:error:badSignatureAlgorithm")]
    BadSignatureAlgorithm,
    #[serde(rename = "urn:ietf:params:acme:error:compound")]
    Compound,
    #[serde(rename = "urn:ietf:params:acme:error:connection")]
    Connection,
    #[serde(rename = "urn:ietf:params:acme:error:dns")]
    DNS,
    #[serde(rename = "urn:ietf:params:acme:error:incorrectResponse")]
    IncorrectResponse,
    #[serde(rename = "urn:ietf:params:acme:error:malformed")]
    Malformed,
    #[serde(rename = "urn:ietf:params:acme:error:orderNotReady")]
    OrderNotReady,
    #[serde(rename = "urn:ietf:params:acme:error:rejectedIdentifier")]
    RejectedIdentifier,
    #[serde(rename = "urn:ietf:params:acme:error:serverInternal")]
    ServerInternal,
    #[serde(rename = "urn:ietf:params:acme:error:tls")]
    TLS,
    #[serde(rename = "urn:ietf:params:acme:error:unauthorized")]
    Unauthorized,
    #[serde(rename = "urn:ietf:params:acme:error:unsupportedContact")]
    UnsupportedContact,
    #[serde(rename = "urn:ietf:params:acme:error:unsupportedIdentifier")]
    UnsupportedIdentifier,
}

impl Error {
    fn new(error_type: Type, status: u16, title: &str, detail: String) -> Self {
        Error {
            error_type,
            status,
            title: title.to_string(),
            detail,
            instance: None,
            sub_problems: vec![],
            identifier: None,
        }
    }

    pub fn malformed<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::Malformed, 400, "Bad request", detail.into())
    }

    /// A lookup miss; rendered as 404 with the malformed type, matching
    /// how missing resources are reported on POST-as-GET reads.
    pub fn not_found<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::Malformed, 404, "Not found", detail.into())
    }

    pub fn unauthorized<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::Unauthorized, 401, "Unauthorized", detail.into())
    }

    pub fn account_does_not_exist<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::AccountDoesNotExist,
            400,
            "Account does not exist",
            detail.into(),
        )
    }

    pub fn account_already_exists<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::AccountAlreadyExists,
            409,
            "Account already exists",
            detail.into(),
        )
    }

    pub fn bad_nonce<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::BadNonce, 400, "Bad nonce", detail.into())
    }

    pub fn bad_csr<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::BadCSR, 400, "Bad CSR", detail.into())
    }

    pub fn bad_public_key<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::BadPublicKey, 400, "Invalid public key", detail.into())
    }

    pub fn bad_signature_algorithm<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::BadSignatureAlgorithm,
            400,
            "Invalid signature algorithm",
            detail.into(),
        )
    }

    pub fn order_not_ready<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::OrderNotReady, 403, "Order not ready", detail.into())
    }

    pub fn rejected_identifier<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::RejectedIdentifier,
            400,
            "Rejected identifier",
            detail.into(),
        )
    }

    pub fn unsupported_identifier<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::UnsupportedIdentifier,
            400,
            "Unsupported identifier",
            detail.into(),
        )
    }

    pub fn unsupported_contact<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::UnsupportedContact,
            400,
            "Unsupported contact",
            detail.into(),
        )
    }

    /// External detail stays generic; callers log the underlying cause
    /// before constructing this.
    pub fn server_internal<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::ServerInternal,
            500,
            "Internal Server Error",
            detail.into(),
        )
    }

    pub fn connection<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::Connection, 400, "Validation failed", detail.into())
    }

    pub fn dns<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::DNS, 400, "Validation failed", detail.into())
    }

    pub fn tls<D: Into<String>>(detail: D) -> Self {
        Self::new(Type::TLS, 400, "Validation failed", detail.into())
    }

    pub fn incorrect_response<D: Into<String>>(detail: D) -> Self {
        Self::new(
            Type::IncorrectResponse,
            400,
            "Validation failed",
            detail.into(),
        )
    }

    pub fn compound(sub_problems: Vec<Error>, detail: String) -> Self {
        Error {
            sub_problems,
            ..Self::new(Type::Compound, 400, "Compound errors", detail)
        }
    }

    pub fn with_identifier(mut self, identifier: super::identifier::Identifier) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// HTTP status the problem document is rendered with.
    pub fn status_code(&self) -> u16 {
        self.status
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.title, self.detail)
    }
}

impl std::error::Error for Error {}
