use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub id_type: String,
    pub value: String,
}

impl Identifier {
    pub fn dns<V: Into<String>>(value: V) -> Self {
        Identifier {
            id_type: Type::DNS.to_string(),
            value: value.into(),
        }
    }

    /// Whether the value requests a wildcard certificate.
    pub fn is_wildcard(&self) -> bool {
        self.value.starts_with("*.")
    }

    /// The value with any leading `*.` stripped.
    pub fn base_value(&self) -> &str {
        self.value.strip_prefix("*.").unwrap_or(&self.value)
    }
}

#[derive(Debug, Eq, PartialEq)]
pub enum Type {
    DNS,
}

impl Type {
    pub fn from_str(id_type: &str) -> Option<Self> {
        match id_type {
            "dns" => Some(Self::DNS),
            _ => None,
        }
    }

    pub fn to_string(&self) -> String {
        match self {
            Self::DNS => "dns".to_string(),
        }
    }
}
