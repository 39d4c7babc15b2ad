//! Flattened-JWS request envelope verification (RFC 8555 §6.2).

use std::convert::TryInto;

use base64::prelude::*;

use super::account::{self, AccountRecord};
use super::{replay, ACMEResult};
use crate::storage::Store;
use crate::types;
use crate::types::jose::{FlattenedJWS, JWSKey, JWSProtectedHeader};

const ALLOWED_ALGS: &[&str] = &["RS256", "ES256", "ES384", "ES512", "EdDSA"];

/// The key a request was authenticated with: a bare JWK for newAccount
/// and key-change inner payloads, or a resolved account for everything
/// else.
#[derive(Debug)]
pub enum JWSRequestKey {
    JWK(types::jose::JWK),
    Account(AccountRecord),
}

#[derive(Debug)]
pub struct JWSRequest {
    pub key: JWSRequestKey,
    /// `None` signals POST-as-GET.
    pub payload: Option<Vec<u8>>,
    pub url: String,
}

impl JWSRequest {
    /// Deserializes a non-empty payload; `miss` names what a bodyless
    /// request was missing.
    pub fn payload_as<R: serde::de::DeserializeOwned>(&self, miss: &str) -> ACMEResult<R> {
        let bytes = self
            .payload
            .as_deref()
            .ok_or_else(|| types::error::Error::malformed(format!("{} payload required", miss)))?;
        serde_json::from_slice(bytes)
            .map_err(|err| types::error::Error::malformed(format!("error decoding payload: {}", err)))
    }

    pub fn is_post_as_get(&self) -> bool {
        match &self.payload {
            None => true,
            // An empty JSON object also reads as a POST-as-GET probe for
            // challenge resources.
            Some(bytes) => bytes == b"{}",
        }
    }
}

fn decode_part(part: &str, what: &str) -> ACMEResult<Vec<u8>> {
    BASE64_URL_SAFE_NO_PAD
        .decode(part)
        .map_err(|err| types::error::Error::malformed(format!("invalid JWS {}: {}", what, err)))
}

fn parse_protected_header(jws: &FlattenedJWS) -> ACMEResult<JWSProtectedHeader> {
    let header_bytes = decode_part(&jws.protected, "protected header")?;
    let header: JWSProtectedHeader = serde_json::from_slice(&header_bytes).map_err(|err| {
        types::error::Error::malformed(format!("invalid JWS protected header: {}", err))
    })?;

    if let Some(crit) = header.crit.as_deref() {
        if !crit.is_empty() {
            return Err(types::error::Error::malformed(format!(
                "unsupported critical header parameters: {:?}",
                crit
            )));
        }
    }
    if header.b64 == Some(false) {
        return Err(types::error::Error::malformed(
            "unencoded JWS payloads are not supported",
        ));
    }
    if !ALLOWED_ALGS.contains(&header.alg.as_str()) {
        return Err(types::error::Error::bad_signature_algorithm(format!(
            "'{}' is not a supported algorithm",
            header.alg
        )));
    }
    Ok(header)
}

/// The kid is the canonical account URL; the account id is its final
/// path segment below `account/`.
fn account_id_from_kid(kid: &str) -> ACMEResult<String> {
    let kid_url = url::Url::parse(kid)
        .map_err(|err| types::error::Error::malformed(format!("invalid kid URL: {}", err)))?;
    let segments: Vec<&str> = kid_url
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    match segments.as_slice() {
        [.., "account", id] if !id.is_empty() => Ok((*id).to_string()),
        _ => Err(types::error::Error::malformed(
            "kid is not an account URL",
        )),
    }
}

async fn resolve_key(db: &dyn Store, header: &JWSProtectedHeader) -> ACMEResult<JWSRequestKey> {
    match &header.key {
        JWSKey::JWK(jwk) => Ok(JWSRequestKey::JWK(jwk.clone())),
        JWSKey::KID(kid) => {
            let id = account_id_from_kid(kid)?;
            let account = match account::try_get_account(db, &id).await? {
                Some(a) => a,
                None => {
                    return Err(types::error::Error::account_does_not_exist(format!(
                        "no account found with ID {}",
                        id
                    )));
                }
            };
            match account.status {
                types::account::Status::Valid => Ok(JWSRequestKey::Account(account)),
                status => Err(types::error::Error::unauthorized(format!(
                    "account {} is {}",
                    id, status
                ))),
            }
        }
    }
}

fn digest_for_alg(alg: &str) -> openssl::hash::MessageDigest {
    match alg {
        "ES384" => openssl::hash::MessageDigest::sha384(),
        "ES512" => openssl::hash::MessageDigest::sha512(),
        _ => openssl::hash::MessageDigest::sha256(),
    }
}

fn ecdsa_coordinate_len(alg: &str) -> usize {
    match alg {
        "ES256" => 32,
        "ES384" => 48,
        _ => 66,
    }
}

fn ec_curve_matches(alg: &str, key: &openssl::ec::EcKeyRef<openssl::pkey::Public>) -> bool {
    let expect = match alg {
        "ES256" => openssl::nid::Nid::X9_62_PRIME256V1,
        "ES384" => openssl::nid::Nid::SECP384R1,
        _ => openssl::nid::Nid::SECP521R1,
    };
    key.group().curve_name() == Some(expect)
}

fn wrong_key_for_alg(alg: &str) -> types::error::Error {
    types::error::Error::bad_signature_algorithm(format!(
        "'{}' is not an appropriate algorithm for the given key",
        alg
    ))
}

/// Raw `r || s` JOSE signature into the DER form openssl verifies.
fn ecdsa_jose_to_der(signature: &[u8], coordinate_len: usize) -> ACMEResult<Vec<u8>> {
    if signature.len() != coordinate_len * 2 {
        return Err(types::error::Error::malformed(
            "invalid ECDSA signature length",
        ));
    }
    let internal = || types::error::Error::server_internal("error decoding signature");
    let r = openssl::bn::BigNum::from_slice(&signature[..coordinate_len])
        .map_err(|_| internal())?;
    let s = openssl::bn::BigNum::from_slice(&signature[coordinate_len..])
        .map_err(|_| internal())?;
    let sig = openssl::ecdsa::EcdsaSig::from_private_components(r, s).map_err(|_| internal())?;
    sig.to_der().map_err(|_| internal())
}

pub(crate) fn verify_signature(
    alg: &str,
    key: &openssl::pkey::PKey<openssl::pkey::Public>,
    message: &[u8],
    signature: &[u8],
) -> ACMEResult<()> {
    let internal = || types::error::Error::server_internal("error verifying signature");

    let verified = match alg {
        "RS256" => {
            if key.id() != openssl::pkey::Id::RSA {
                return Err(wrong_key_for_alg(alg));
            }
            let mut verifier = openssl::sign::Verifier::new(digest_for_alg(alg), key)
                .map_err(|_| internal())?;
            verifier
                .verify_oneshot(signature, message)
                .map_err(|_| internal())?
        }
        "ES256" | "ES384" | "ES512" => {
            let ec_key = key.ec_key().map_err(|_| wrong_key_for_alg(alg))?;
            if !ec_curve_matches(alg, &ec_key) {
                return Err(wrong_key_for_alg(alg));
            }
            let der = ecdsa_jose_to_der(signature, ecdsa_coordinate_len(alg))?;
            let mut verifier = openssl::sign::Verifier::new(digest_for_alg(alg), key)
                .map_err(|_| internal())?;
            verifier
                .verify_oneshot(&der, message)
                .map_err(|_| internal())?
        }
        "EdDSA" => {
            if key.id() != openssl::pkey::Id::ED25519 {
                return Err(wrong_key_for_alg(alg));
            }
            let mut verifier =
                openssl::sign::Verifier::new_without_digest(key).map_err(|_| internal())?;
            verifier
                .verify_oneshot(signature, message)
                .map_err(|_| internal())?
        }
        other => {
            return Err(types::error::Error::bad_signature_algorithm(format!(
                "'{}' is not a supported algorithm",
                other
            )));
        }
    };

    if !verified {
        return Err(types::error::Error::malformed("invalid JWS signature"));
    }
    Ok(())
}

/// Full request-envelope verification: header checks, URL binding, key
/// resolution, signature check, then single-use nonce consumption.
pub(crate) async fn verify_request(
    db: &dyn Store,
    nonce_lifetime: chrono::Duration,
    jws: &FlattenedJWS,
    request_url: &str,
) -> ACMEResult<JWSRequest> {
    let header = parse_protected_header(jws)?;

    let nonce = header
        .nonce
        .as_deref()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| types::error::Error::bad_nonce("a nonce must be provided"))?;

    if header.url != request_url {
        return Err(types::error::Error::unauthorized(format!(
            "JWS is for '{}' but the request was made to '{}'",
            header.url, request_url
        )));
    }

    let key = resolve_key(db, &header).await?;
    let pkey: openssl::pkey::PKey<openssl::pkey::Public> = match &key {
        JWSRequestKey::JWK(jwk) => jwk
            .try_into()
            .map_err(|err: String| types::error::Error::bad_public_key(err))?,
        JWSRequestKey::Account(account) => (&account.key)
            .try_into()
            .map_err(|err: String| {
                log::error!("Stored account key failed to decode: {}", err);
                types::error::Error::server_internal("error loading account key")
            })?,
    };

    let signature = decode_part(&jws.signature, "signature")?;
    let message = format!("{}.{}", jws.protected, jws.payload);
    verify_signature(&header.alg, &pkey, message.as_bytes(), &signature)?;

    replay::use_nonce(db, nonce_lifetime, nonce).await?;

    let payload_bytes = decode_part(&jws.payload, "payload")?;
    let payload = if payload_bytes.is_empty() {
        None
    } else {
        Some(payload_bytes)
    };

    Ok(JWSRequest {
        key,
        payload,
        url: header.url,
    })
}
