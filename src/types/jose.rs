use std::convert::TryFrom;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Flattened JWS serialization, the only form ACME accepts. Unknown
/// members are rejected, which rules out the general `signatures` form
/// and bodies smuggling an unprotected `header`.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FlattenedJWS {
    pub payload: String,
    pub protected: String,
    pub signature: String,
}

/// Protected header of an ACME request JWS (RFC 8555 §6.2).
#[derive(Debug, Deserialize, Serialize)]
pub struct JWSProtectedHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crit: Option<Vec<String>>,
    #[serde(flatten)]
    pub key: JWSKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64: Option<bool>,
}

/// Exactly one of `jwk` or `kid`; a header carrying both or neither
/// fails deserialization and is reported as malformed.
#[derive(Debug, Deserialize, Serialize)]
pub enum JWSKey {
    #[serde(rename = "kid")]
    KID(String),
    #[serde(rename = "jwk")]
    JWK(JWK),
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct JWK {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(flatten)]
    pub params: JWKType,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum JWKType {
    EC { crv: String, x: String, y: String },
    RSA { n: String, e: String },
    OKP { crv: String, x: String },
}

impl JWK {
    /// base64url(SHA-256) of the RFC 7638 canonical form: only the
    /// required members, in lexicographic order.
    pub fn thumbprint(&self) -> Result<String, String> {
        let canonical = match &self.params {
            JWKType::EC { crv, x, y } => format!(
                "{{\"crv\":{},\"kty\":{},\"x\":{},\"y\":{}}}",
                serde_json::to_string(crv).unwrap(),
                serde_json::to_string(&self.kty).unwrap(),
                serde_json::to_string(x).unwrap(),
                serde_json::to_string(y).unwrap(),
            ),
            JWKType::RSA { n, e } => format!(
                "{{\"e\":{},\"kty\":{},\"n\":{}}}",
                serde_json::to_string(e).unwrap(),
                serde_json::to_string(&self.kty).unwrap(),
                serde_json::to_string(n).unwrap(),
            ),
            JWKType::OKP { crv, x } => format!(
                "{{\"crv\":{},\"kty\":{},\"x\":{}}}",
                serde_json::to_string(crv).unwrap(),
                serde_json::to_string(&self.kty).unwrap(),
                serde_json::to_string(x).unwrap(),
            ),
        };
        let digest =
            openssl::hash::hash(openssl::hash::MessageDigest::sha256(), canonical.as_bytes())
                .map_err(|e| e.to_string())?;
        Ok(BASE64_URL_SAFE_NO_PAD.encode(&digest))
    }
}

fn ec_group_for_curve(crv: &str) -> Result<openssl::ec::EcGroup, String> {
    let nid = match crv {
        "P-256" => openssl::nid::Nid::X9_62_PRIME256V1,
        "P-384" => openssl::nid::Nid::SECP384R1,
        "P-521" => openssl::nid::Nid::SECP521R1,
        o => return Err(format!("'{}' is not a supported curve", o)),
    };
    openssl::ec::EcGroup::from_curve_name(nid).map_err(|e| e.to_string())
}

impl TryFrom<&JWK> for openssl::pkey::PKey<openssl::pkey::Public> {
    type Error = String;

    fn try_from(from: &JWK) -> Result<Self, Self::Error> {
        match (from.kty.as_str(), &from.params) {
            ("EC", JWKType::EC { crv, x, y }) => {
                let ec_group = ec_group_for_curve(crv)?;
                let x = BASE64_URL_SAFE_NO_PAD
                    .decode(x)
                    .map_err(|err| format!("Invalid x parameter: {}", err))?;
                let y = BASE64_URL_SAFE_NO_PAD
                    .decode(y)
                    .map_err(|err| format!("Invalid y parameter: {}", err))?;
                let x = openssl::bn::BigNum::from_slice(&x)
                    .map_err(|err| format!("Invalid x parameter: {}", err))?;
                let y = openssl::bn::BigNum::from_slice(&y)
                    .map_err(|err| format!("Invalid y parameter: {}", err))?;
                let key =
                    openssl::ec::EcKey::from_public_key_affine_coordinates(&ec_group, &x, &y)
                        .map_err(|err| format!("Invalid public key: {}", err))?;
                openssl::pkey::PKey::from_ec_key(key).map_err(|e| e.to_string())
            }
            ("RSA", JWKType::RSA { n, e }) => {
                let n = BASE64_URL_SAFE_NO_PAD
                    .decode(n)
                    .map_err(|err| format!("Invalid n parameter: {}", err))?;
                let e = BASE64_URL_SAFE_NO_PAD
                    .decode(e)
                    .map_err(|err| format!("Invalid e parameter: {}", err))?;
                let n = openssl::bn::BigNum::from_slice(&n)
                    .map_err(|err| format!("Invalid n parameter: {}", err))?;
                let e = openssl::bn::BigNum::from_slice(&e)
                    .map_err(|err| format!("Invalid e parameter: {}", err))?;
                let key = openssl::rsa::Rsa::from_public_components(n, e)
                    .map_err(|err| format!("Invalid public key: {}", err))?;
                openssl::pkey::PKey::from_rsa(key).map_err(|e| e.to_string())
            }
            ("OKP", JWKType::OKP { crv, x }) => {
                if crv != "Ed25519" {
                    return Err(format!("'{}' is not a supported curve", crv));
                }
                let x = BASE64_URL_SAFE_NO_PAD
                    .decode(x)
                    .map_err(|err| format!("Invalid x parameter: {}", err))?;
                openssl::pkey::PKey::public_key_from_raw_bytes(&x, openssl::pkey::Id::ED25519)
                    .map_err(|err| format!("Invalid public key: {}", err))
            }
            (o, _) => Err(format!("'{}' is not a supported key type", o)),
        }
    }
}

impl TryFrom<&openssl::pkey::PKey<openssl::pkey::Public>> for JWK {
    type Error = String;

    fn try_from(from: &openssl::pkey::PKey<openssl::pkey::Public>) -> Result<Self, Self::Error> {
        let (kty, params) = match from.id() {
            openssl::pkey::Id::EC => {
                let ec_key = from.ec_key().map_err(|e| e.to_string())?;

                let (crv, coord_len) = match ec_key.group().curve_name() {
                    Some(openssl::nid::Nid::X9_62_PRIME256V1) => ("P-256", 32),
                    Some(openssl::nid::Nid::SECP384R1) => ("P-384", 48),
                    Some(openssl::nid::Nid::SECP521R1) => ("P-521", 66),
                    _ => return Err("Unknown curve".to_string()),
                };

                let mut ctx = openssl::bn::BigNumContext::new().map_err(|e| e.to_string())?;
                let mut x = openssl::bn::BigNum::new().map_err(|e| e.to_string())?;
                let mut y = openssl::bn::BigNum::new().map_err(|e| e.to_string())?;
                ec_key
                    .public_key()
                    .affine_coordinates(ec_key.group(), &mut x, &mut y, &mut ctx)
                    .map_err(|e| e.to_string())?;

                let x = x.to_vec_padded(coord_len).map_err(|e| e.to_string())?;
                let y = y.to_vec_padded(coord_len).map_err(|e| e.to_string())?;

                (
                    "EC",
                    JWKType::EC {
                        crv: crv.to_string(),
                        x: BASE64_URL_SAFE_NO_PAD.encode(x),
                        y: BASE64_URL_SAFE_NO_PAD.encode(y),
                    },
                )
            }
            openssl::pkey::Id::RSA => {
                let rsa_key = from.rsa().map_err(|e| e.to_string())?;

                (
                    "RSA",
                    JWKType::RSA {
                        n: BASE64_URL_SAFE_NO_PAD.encode(rsa_key.n().to_vec()),
                        e: BASE64_URL_SAFE_NO_PAD.encode(rsa_key.e().to_vec()),
                    },
                )
            }
            openssl::pkey::Id::ED25519 => {
                let raw = from.raw_public_key().map_err(|e| e.to_string())?;
                (
                    "OKP",
                    JWKType::OKP {
                        crv: "Ed25519".to_string(),
                        x: BASE64_URL_SAFE_NO_PAD.encode(raw),
                    },
                )
            }
            _ => return Err("Unsupported key type".to_string()),
        };

        Ok(JWK {
            kty: kty.to_string(),
            params,
            kid: None,
            alg: None,
            key_use: None,
        })
    }
}
