use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::links::{Link, LinkBuilder};
use super::{
    get_record, insert_record, store_error, update_record, ACMEResult, Record,
    ACCOUNT_BY_KEY_ID_TABLE, ACCOUNT_TABLE,
};
use crate::storage::Store;
use crate::types;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AccountRecord {
    pub id: String,
    pub status: types::account::Status,
    pub contact: Vec<String>,
    pub key: types::jose::JWK,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

impl Record for AccountRecord {
    fn bump_version(&mut self) {
        self.version += 1;
    }
}

impl AccountRecord {
    pub fn to_acme(
        &self,
        links: &LinkBuilder,
        provisioner: &str,
        base_url: &str,
    ) -> types::account::Account {
        types::account::Account {
            id: self.id.clone(),
            status: self.status,
            contact: self.contact.clone(),
            key: self.key.clone(),
            orders: links.link(Link::OrdersByAccount, provisioner, true, base_url, &[&self.id]),
            created_at: self.created_at,
        }
    }

    /// Live accounts may mutate resources; anything else may not.
    pub fn is_active(&self) -> bool {
        self.status == types::account::Status::Valid
    }
}

pub(crate) fn key_to_id(jwk: &types::jose::JWK) -> ACMEResult<String> {
    jwk.thumbprint().map_err(|err| {
        log::error!("Error generating JWK thumbprint: {}", err);
        types::error::Error::server_internal("error generating key thumbprint")
    })
}

pub(crate) async fn try_get_account(
    db: &dyn Store,
    id: &str,
) -> ACMEResult<Option<AccountRecord>> {
    get_record(db, ACCOUNT_TABLE, id).await
}

pub(crate) async fn get_account(db: &dyn Store, id: &str) -> ACMEResult<AccountRecord> {
    try_get_account(db, id)
        .await?
        .ok_or_else(|| types::error::Error::not_found(format!("account {} does not exist", id)))
}

/// Creates the account and its key-thumbprint index entry. The index
/// insert is the uniqueness gate: losing the insert-if-absent means an
/// account already owns this key.
pub(crate) async fn new_account(
    db: &dyn Store,
    contact: Vec<String>,
    key: types::jose::JWK,
) -> ACMEResult<AccountRecord> {
    let kid = key_to_id(&key)?;
    let account = AccountRecord {
        id: crate::util::new_id(),
        status: types::account::Status::Valid,
        contact,
        key,
        created_at: Utc::now(),
        version: 0,
    };

    let claimed = db
        .cas(
            ACCOUNT_BY_KEY_ID_TABLE,
            kid.as_bytes(),
            None,
            account.id.clone().into_bytes(),
        )
        .await
        .map_err(|err| store_error(err, "error writing account key index"))?;
    if !claimed {
        let existing = db
            .get(ACCOUNT_BY_KEY_ID_TABLE, kid.as_bytes())
            .await
            .map_err(|err| store_error(err, "error reading account key index"))?
            .map(|v| String::from_utf8_lossy(&v).into_owned())
            .unwrap_or_default();
        return Err(types::error::Error::account_already_exists(format!(
            "account with this key already exists: {}",
            existing
        )));
    }

    if let Err(err) = insert_record(db, ACCOUNT_TABLE, &account.id, &account).await {
        // Roll the index claim back so the key is not wedged.
        if let Err(del_err) = db.delete(ACCOUNT_BY_KEY_ID_TABLE, kid.as_bytes()).await {
            log::error!("Unable to roll back key index for {}: {}", kid, del_err);
        }
        return Err(err);
    }
    Ok(account)
}

pub(crate) async fn get_account_by_key(
    db: &dyn Store,
    jwk: &types::jose::JWK,
) -> ACMEResult<AccountRecord> {
    let kid = key_to_id(jwk)?;
    let id = db
        .get(ACCOUNT_BY_KEY_ID_TABLE, kid.as_bytes())
        .await
        .map_err(|err| store_error(err, "error reading account key index"))?
        .ok_or_else(|| {
            types::error::Error::account_does_not_exist(
                "account with this key does not exist",
            )
        })?;
    let id = String::from_utf8_lossy(&id).into_owned();
    get_account(db, &id).await
}

pub(crate) async fn update_contacts(
    db: &dyn Store,
    id: &str,
    contact: Vec<String>,
) -> ACMEResult<AccountRecord> {
    update_record(
        db,
        ACCOUNT_TABLE,
        id,
        || types::error::Error::not_found(format!("account {} does not exist", id)),
        |account: &mut AccountRecord| {
            if !account.is_active() {
                return Err(types::error::Error::unauthorized(format!(
                    "account {} is {}",
                    account.id, account.status
                )));
            }
            if account.contact == contact {
                return Ok(false);
            }
            account.contact = contact.clone();
            Ok(true)
        },
    )
    .await
}

/// `valid -> deactivated`; idempotent when already deactivated.
pub(crate) async fn deactivate(db: &dyn Store, id: &str) -> ACMEResult<AccountRecord> {
    update_record(
        db,
        ACCOUNT_TABLE,
        id,
        || types::error::Error::not_found(format!("account {} does not exist", id)),
        |account: &mut AccountRecord| match account.status {
            types::account::Status::Deactivated => Ok(false),
            types::account::Status::Revoked => Err(types::error::Error::unauthorized(format!(
                "account {} is revoked",
                account.id
            ))),
            types::account::Status::Valid => {
                account.status = types::account::Status::Deactivated;
                Ok(true)
            }
        },
    )
    .await
}

/// RFC 8555 §7.3.5 key rollover: bind the account to `new_key`, moving
/// the thumbprint index. The insert-if-absent on the new thumbprint
/// keeps key uniqueness across live accounts.
pub(crate) async fn change_key(
    db: &dyn Store,
    id: &str,
    new_key: types::jose::JWK,
) -> ACMEResult<AccountRecord> {
    let account = get_account(db, id).await?;
    if !account.is_active() {
        return Err(types::error::Error::unauthorized(format!(
            "account {} is {}",
            account.id, account.status
        )));
    }

    let old_kid = key_to_id(&account.key)?;
    let new_kid = key_to_id(&new_key)?;
    if old_kid == new_kid {
        return Ok(account);
    }

    let claimed = db
        .cas(
            ACCOUNT_BY_KEY_ID_TABLE,
            new_kid.as_bytes(),
            None,
            id.as_bytes().to_vec(),
        )
        .await
        .map_err(|err| store_error(err, "error writing account key index"))?;
    if !claimed {
        return Err(types::error::Error::account_already_exists(
            "another account already uses the new key",
        ));
    }

    let updated = update_record(
        db,
        ACCOUNT_TABLE,
        id,
        || types::error::Error::not_found(format!("account {} does not exist", id)),
        |account: &mut AccountRecord| {
            account.key = new_key.clone();
            Ok(true)
        },
    )
    .await?;

    if !db
        .delete(ACCOUNT_BY_KEY_ID_TABLE, old_kid.as_bytes())
        .await
        .map_err(|err| store_error(err, "error deleting account key index"))?
    {
        log::warn!("Stale key index entry {} was already gone", old_kid);
    }
    Ok(updated)
}
