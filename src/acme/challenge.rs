use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::links::{Link, LinkBuilder};
use super::{get_record, insert_record, update_record, ACMEResult, Record, CHALLENGE_TABLE};
use crate::storage::Store;
use crate::types;
use crate::validator::{self, ValidationClient};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChallengeRecord {
    pub id: String,
    pub account_id: String,
    pub authz_id: String,
    pub challenge_type: types::challenge::Type,
    pub token: String,
    pub status: types::challenge::Status,
    pub validated: Option<DateTime<Utc>>,
    pub error: Option<types::error::Error>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Record for ChallengeRecord {
    fn bump_version(&mut self) {
        self.version += 1;
    }
}

impl ChallengeRecord {
    pub fn to_acme(
        &self,
        links: &LinkBuilder,
        provisioner: &str,
        base_url: &str,
    ) -> types::challenge::Challenge {
        types::challenge::Challenge {
            id: self.id.clone(),
            challenge_type: self.challenge_type,
            url: links.link(Link::Challenge, provisioner, true, base_url, &[&self.id]),
            status: self.status,
            token: self.token.clone(),
            validated: self.validated,
            error: self.error.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            types::challenge::Status::Valid | types::challenge::Status::Invalid
        )
    }
}

/// `token || '.' || base64url(SHA-256 thumbprint(jwk))` (RFC 8555 §8.1).
pub(crate) fn key_authorization(token: &str, jwk: &types::jose::JWK) -> ACMEResult<String> {
    let thumbprint = super::account::key_to_id(jwk)?;
    Ok(format!("{}.{}", token, thumbprint))
}

pub(crate) async fn new_challenge(
    db: &dyn Store,
    account_id: &str,
    authz_id: &str,
    challenge_type: types::challenge::Type,
) -> ACMEResult<ChallengeRecord> {
    let token = crate::util::random_token(16).map_err(|err| {
        log::error!("Unable to generate challenge token: {}", err);
        types::error::Error::server_internal("error generating challenge token")
    })?;
    let challenge = ChallengeRecord {
        id: crate::util::new_id(),
        account_id: account_id.to_string(),
        authz_id: authz_id.to_string(),
        challenge_type,
        token,
        status: types::challenge::Status::Pending,
        validated: None,
        error: None,
        created_at: Utc::now(),
        version: 0,
    };
    insert_record(db, CHALLENGE_TABLE, &challenge.id, &challenge).await?;
    Ok(challenge)
}

pub(crate) async fn get_challenge(db: &dyn Store, id: &str) -> ACMEResult<ChallengeRecord> {
    get_record(db, CHALLENGE_TABLE, id)
        .await?
        .ok_or_else(|| types::error::Error::not_found(format!("challenge {} does not exist", id)))
}

fn miss(id: &str) -> impl Fn() -> types::error::Error + '_ {
    move || types::error::Error::not_found(format!("challenge {} does not exist", id))
}

/// Runs the validator for a pending challenge and commits the terminal
/// result. Terminal challenges are returned untouched, so a client
/// re-POSTing an `invalid` challenge reads back the stored error. A
/// challenge found in `processing` (an earlier attempt was cut short)
/// is re-validated rather than wedged.
pub(crate) async fn validate_challenge(
    db: &dyn Store,
    client: &ValidationClient,
    account_id: &str,
    challenge_id: &str,
    identifier: &types::identifier::Identifier,
    jwk: &types::jose::JWK,
) -> ACMEResult<ChallengeRecord> {
    let challenge = get_challenge(db, challenge_id).await?;
    if challenge.account_id != account_id {
        return Err(types::error::Error::unauthorized(
            "account does not own challenge",
        ));
    }
    if challenge.is_terminal() {
        return Ok(challenge);
    }

    let challenge = update_record(
        db,
        CHALLENGE_TABLE,
        challenge_id,
        miss(challenge_id),
        |c: &mut ChallengeRecord| {
            if c.is_terminal() {
                return Ok(false);
            }
            c.status = types::challenge::Status::Processing;
            Ok(true)
        },
    )
    .await?;
    if challenge.is_terminal() {
        return Ok(challenge);
    }

    let key_auth = key_authorization(&challenge.token, jwk)?;
    let outcome = validator::validate(
        client,
        challenge.challenge_type,
        identifier,
        &challenge.token,
        &key_auth,
    )
    .await;

    update_record(
        db,
        CHALLENGE_TABLE,
        challenge_id,
        miss(challenge_id),
        |c: &mut ChallengeRecord| {
            if c.is_terminal() {
                // Another request finished the validation first.
                return Ok(false);
            }
            match &outcome {
                Ok(()) => {
                    c.status = types::challenge::Status::Valid;
                    c.validated = Some(Utc::now());
                    c.error = None;
                }
                Err(err) => {
                    c.status = types::challenge::Status::Invalid;
                    c.error = Some(err.clone().with_identifier(identifier.clone()));
                }
            }
            Ok(true)
        },
    )
    .await
}
