//! Single-use replay nonces backing the `Replay-Nonce` header.

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

use super::{store_error, ACMEResult, NONCE_TABLE};
use crate::storage::Store;
use crate::types;

#[derive(Debug, Serialize, Deserialize)]
struct NonceRecord {
    issued_at: DateTime<Utc>,
}

fn reused_nonce() -> types::error::Error {
    types::error::Error::bad_nonce("the nonce may have expired or it is being reused")
}

/// Generates, persists, and returns a fresh 128-bit nonce.
pub(crate) async fn new_nonce(db: &dyn Store) -> ACMEResult<String> {
    let nonce = crate::util::random_token(16).map_err(|err| {
        log::error!("Unable to generate nonce: {}", err);
        types::error::Error::server_internal("error generating nonce")
    })?;
    let record = NonceRecord {
        issued_at: Utc::now(),
    };
    let value = serde_json::to_vec(&record).map_err(|err| {
        log::error!("Unable to serialize nonce record: {}", err);
        types::error::Error::server_internal("error storing nonce")
    })?;
    db.put(NONCE_TABLE, nonce.as_bytes(), value)
        .await
        .map_err(|err| store_error(err, "error storing nonce"))?;
    Ok(nonce)
}

/// Consumes a nonce. The atomic delete is the single-use guarantee: of
/// two racing requests carrying the same nonce, exactly one observes
/// the removal.
pub(crate) async fn use_nonce(
    db: &dyn Store,
    lifetime: chrono::Duration,
    nonce: &str,
) -> ACMEResult<()> {
    let value = db
        .get(NONCE_TABLE, nonce.as_bytes())
        .await
        .map_err(|err| store_error(err, "error looking up nonce"))?;
    let record: NonceRecord = match value {
        Some(v) => serde_json::from_slice(&v).map_err(|err| {
            log::error!("Corrupt nonce record for '{}': {}", nonce, err);
            types::error::Error::server_internal("error reading nonce")
        })?,
        None => return Err(reused_nonce()),
    };

    let removed = db
        .delete(NONCE_TABLE, nonce.as_bytes())
        .await
        .map_err(|err| store_error(err, "error deleting nonce"))?;
    if !removed {
        // Lost the race to another request carrying the same nonce.
        return Err(reused_nonce());
    }

    if record.issued_at + lifetime < Utc::now() {
        // Expired nonces behave exactly like absent ones.
        return Err(reused_nonce());
    }
    Ok(())
}
