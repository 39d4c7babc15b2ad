use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::challenge::{self, ChallengeRecord};
use super::links::LinkBuilder;
use super::{get_record, insert_record, update_record, ACMEResult, Record, AUTHZ_TABLE};
use crate::storage::Store;
use crate::types;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuthzRecord {
    pub id: String,
    pub account_id: String,
    /// Base identifier, wildcard prefix stripped.
    pub identifier: types::identifier::Identifier,
    pub wildcard: bool,
    pub status: types::authorization::Status,
    pub challenge_ids: Vec<String>,
    pub expires_at: DateTime<Utc>,
    pub version: u64,
}

impl Record for AuthzRecord {
    fn bump_version(&mut self) {
        self.version += 1;
    }
}

impl AuthzRecord {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self.status,
            types::authorization::Status::Pending | types::authorization::Status::Valid
        )
    }

    pub async fn to_acme(
        &self,
        db: &dyn Store,
        links: &LinkBuilder,
        provisioner: &str,
        base_url: &str,
    ) -> ACMEResult<types::authorization::Authorization> {
        let mut challenges = Vec::with_capacity(self.challenge_ids.len());
        for cid in &self.challenge_ids {
            let chall = challenge::get_challenge(db, cid).await?;
            challenges.push(chall.to_acme(links, provisioner, base_url));
        }
        Ok(types::authorization::Authorization {
            id: self.id.clone(),
            identifier: self.identifier.clone(),
            status: self.status,
            expires: self.expires_at,
            challenges,
            wildcard: if self.wildcard { Some(true) } else { None },
        })
    }
}

/// Creates the authorization and its challenges. Wildcard names can
/// only be proven over DNS, so they get a single DNS-01 challenge;
/// everything else gets one challenge per supported type.
pub(crate) async fn new_authz(
    db: &dyn Store,
    account_id: &str,
    identifier: &types::identifier::Identifier,
    expires_at: DateTime<Utc>,
) -> ACMEResult<AuthzRecord> {
    let wildcard = identifier.is_wildcard();
    let challenge_types: &[types::challenge::Type] = if wildcard {
        &[types::challenge::Type::DNS01]
    } else {
        &[
            types::challenge::Type::HTTP01,
            types::challenge::Type::DNS01,
            types::challenge::Type::TLSALPN01,
        ]
    };

    let id = crate::util::new_id();
    let mut challenge_ids = Vec::with_capacity(challenge_types.len());
    for t in challenge_types {
        let chall = challenge::new_challenge(db, account_id, &id, *t).await?;
        challenge_ids.push(chall.id);
    }

    let authz = AuthzRecord {
        id,
        account_id: account_id.to_string(),
        identifier: types::identifier::Identifier::dns(identifier.base_value()),
        wildcard,
        status: types::authorization::Status::Pending,
        challenge_ids,
        expires_at,
        version: 0,
    };
    insert_record(db, AUTHZ_TABLE, &authz.id, &authz).await?;
    Ok(authz)
}

pub(crate) async fn get_authz(db: &dyn Store, id: &str) -> ACMEResult<AuthzRecord> {
    get_record(db, AUTHZ_TABLE, id)
        .await?
        .ok_or_else(|| {
            types::error::Error::not_found(format!("authorization {} does not exist", id))
        })
}

pub(crate) async fn challenges_of(
    db: &dyn Store,
    authz: &AuthzRecord,
) -> ACMEResult<Vec<ChallengeRecord>> {
    let mut challenges = Vec::with_capacity(authz.challenge_ids.len());
    for cid in &authz.challenge_ids {
        challenges.push(challenge::get_challenge(db, cid).await?);
    }
    Ok(challenges)
}

/// Pull-based status recomputation: derives the authorization status
/// from its children and the expiry clock, then persists the change
/// under compare-and-swap.
pub(crate) async fn update_status(db: &dyn Store, authz: AuthzRecord) -> ACMEResult<AuthzRecord> {
    let now = Utc::now();
    let target = match authz.status {
        types::authorization::Status::Pending => {
            if authz.expires_at < now {
                Some(types::authorization::Status::Invalid)
            } else {
                let challenges = challenges_of(db, &authz).await?;
                if challenges
                    .iter()
                    .any(|c| c.status == types::challenge::Status::Valid)
                {
                    Some(types::authorization::Status::Valid)
                } else if !challenges.is_empty()
                    && challenges
                        .iter()
                        .all(|c| c.status == types::challenge::Status::Invalid)
                {
                    Some(types::authorization::Status::Invalid)
                } else {
                    None
                }
            }
        }
        types::authorization::Status::Valid => {
            if authz.expires_at < now {
                Some(types::authorization::Status::Expired)
            } else {
                None
            }
        }
        _ => None,
    };

    let target = match target {
        Some(t) => t,
        None => return Ok(authz),
    };

    let id = authz.id.clone();
    update_record(
        db,
        AUTHZ_TABLE,
        &authz.id,
        move || types::error::Error::not_found(format!("authorization {} does not exist", id)),
        |a: &mut AuthzRecord| {
            if a.is_terminal() {
                return Ok(false);
            }
            a.status = target;
            Ok(true)
        },
    )
    .await
}

/// Owner-requested deactivation; also driven by account deactivation.
pub(crate) async fn deactivate(db: &dyn Store, id: &str) -> ACMEResult<AuthzRecord> {
    update_record(
        db,
        AUTHZ_TABLE,
        id,
        || types::error::Error::not_found(format!("authorization {} does not exist", id)),
        |a: &mut AuthzRecord| match a.status {
            types::authorization::Status::Deactivated => Ok(false),
            _ => {
                a.status = types::authorization::Status::Deactivated;
                Ok(true)
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acme::tests::test_store;
    use crate::types::authorization::Status;

    fn tomorrow() -> DateTime<Utc> {
        Utc::now() + chrono::Duration::hours(24)
    }

    #[tokio::test]
    async fn plain_identifier_gets_all_challenge_types() {
        let db = test_store().await;
        let authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        assert!(!authz.wildcard);
        assert_eq!(authz.challenge_ids.len(), 3);
        let challenges = challenges_of(&db, &authz).await.unwrap();
        let kinds: Vec<_> = challenges.iter().map(|c| c.challenge_type).collect();
        assert!(kinds.contains(&types::challenge::Type::HTTP01));
        assert!(kinds.contains(&types::challenge::Type::DNS01));
        assert!(kinds.contains(&types::challenge::Type::TLSALPN01));
    }

    #[tokio::test]
    async fn wildcard_identifier_gets_dns01_only() {
        let db = test_store().await;
        let authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("*.example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        assert!(authz.wildcard);
        assert_eq!(authz.identifier.value, "example.com");
        let challenges = challenges_of(&db, &authz).await.unwrap();
        assert_eq!(challenges.len(), 1);
        assert_eq!(challenges[0].challenge_type, types::challenge::Type::DNS01);
    }

    async fn force_challenge_status(
        db: &dyn Store,
        cid: &str,
        status: types::challenge::Status,
    ) {
        crate::acme::update_record(
            db,
            crate::acme::CHALLENGE_TABLE,
            cid,
            || types::error::Error::not_found("challenge missing"),
            |c: &mut ChallengeRecord| {
                c.status = status;
                Ok(true)
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn any_valid_challenge_validates_the_authz() {
        let db = test_store().await;
        let authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        force_challenge_status(&db, &authz.challenge_ids[1], types::challenge::Status::Valid)
            .await;
        let updated = update_status(&db, authz).await.unwrap();
        assert_eq!(updated.status, Status::Valid);
    }

    #[tokio::test]
    async fn all_invalid_challenges_invalidate_the_authz() {
        let db = test_store().await;
        let authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        for cid in &authz.challenge_ids {
            force_challenge_status(&db, cid, types::challenge::Status::Invalid).await;
        }
        let updated = update_status(&db, authz).await.unwrap();
        assert_eq!(updated.status, Status::Invalid);
    }

    #[tokio::test]
    async fn one_invalid_challenge_keeps_the_authz_pending() {
        let db = test_store().await;
        let authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        force_challenge_status(&db, &authz.challenge_ids[0], types::challenge::Status::Invalid)
            .await;
        let updated = update_status(&db, authz).await.unwrap();
        assert_eq!(updated.status, Status::Pending);
    }

    #[tokio::test]
    async fn valid_authz_expires() {
        let db = test_store().await;
        let mut authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        force_challenge_status(&db, &authz.challenge_ids[0], types::challenge::Status::Valid)
            .await;
        authz = update_status(&db, authz).await.unwrap();
        assert_eq!(authz.status, Status::Valid);

        // Push the expiry into the past and recompute.
        authz = crate::acme::update_record(
            &db,
            AUTHZ_TABLE,
            &authz.id.clone(),
            || types::error::Error::not_found("authz missing"),
            |a: &mut AuthzRecord| {
                a.expires_at = Utc::now() - chrono::Duration::minutes(1);
                Ok(true)
            },
        )
        .await
        .unwrap();

        let updated = update_status(&db, authz).await.unwrap();
        assert_eq!(updated.status, Status::Expired);
    }

    #[tokio::test]
    async fn deactivation_wins_from_any_live_state() {
        let db = test_store().await;
        let authz = new_authz(
            &db,
            "acct",
            &types::identifier::Identifier::dns("example.com"),
            tomorrow(),
        )
        .await
        .unwrap();

        let deactivated = deactivate(&db, &authz.id).await.unwrap();
        assert_eq!(deactivated.status, Status::Deactivated);
        // Idempotent.
        let again = deactivate(&db, &authz.id).await.unwrap();
        assert_eq!(again.version, deactivated.version);
    }
}
