use base64::prelude::*;

/// Opaque resource id: a v4 UUID rendered as unpadded base64url.
pub fn new_id() -> String {
    BASE64_URL_SAFE_NO_PAD.encode(uuid::Uuid::new_v4().as_bytes())
}

/// Random base64url token of `len` bytes of entropy.
pub fn random_token(len: usize) -> Result<String, openssl::error::ErrorStack> {
    let mut buf = vec![0u8; len];
    openssl::rand::rand_bytes(&mut buf)?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(&buf))
}

pub fn b64_sha256(data: &[u8]) -> String {
    let digest = openssl::hash::hash(openssl::hash::MessageDigest::sha256(), data)
        .expect("SHA-256 is always available");
    BASE64_URL_SAFE_NO_PAD.encode(&digest)
}
