//! Ed25519 signing over canonical payload bytes.

use std::fs;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{ProtocolError, ProtocolResult};

pub const PUBLIC_KEY_HEX_LEN: usize = 64;
pub const PRIVATE_KEY_FILE: &str = "private.hex";
pub const PUBLIC_KEY_FILE: &str = "public.hex";

pub fn generate_keypair() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn public_key_hex(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

pub fn private_key_hex(key: &SigningKey) -> String {
    hex::encode(key.to_bytes())
}

/// Signs `payload` and returns the 64-byte signature as hex.
pub fn sign(key: &SigningKey, payload: &[u8]) -> String {
    hex::encode(key.sign(payload).to_bytes())
}

/// Verifies a hex signature. Every failure, malformed input included,
/// comes back as `false`.
pub fn verify(public_key_hex: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(key) = parse_public_key(public_key_hex) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(payload, &signature).is_ok()
}

/// Parses a 32-byte public key given as exactly 64 hex characters.
pub fn parse_public_key(public_key_hex: &str) -> ProtocolResult<VerifyingKey> {
    let bytes = decode_key_bytes(public_key_hex)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|err| ProtocolError::InvalidKey(format!("not a valid ed25519 point: {err}")))
}

pub fn parse_signing_key(private_key_hex: &str) -> ProtocolResult<SigningKey> {
    let bytes = decode_key_bytes(private_key_hex)?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn decode_key_bytes(raw: &str) -> ProtocolResult<[u8; 32]> {
    let raw = raw.trim();
    if raw.len() != PUBLIC_KEY_HEX_LEN {
        return Err(ProtocolError::InvalidKey(format!(
            "expected {} hex characters, got {}",
            PUBLIC_KEY_HEX_LEN,
            raw.len()
        )));
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(raw, &mut bytes)
        .map_err(|err| ProtocolError::InvalidKey(err.to_string()))?;
    Ok(bytes)
}

/// Writes `private.hex` and `public.hex` into `dir`, creating it if needed.
pub fn save_keypair(dir: &Path, key: &SigningKey) -> ProtocolResult<()> {
    fs::create_dir_all(dir).map_err(|e| ProtocolError::io(dir, e))?;
    let private_path = dir.join(PRIVATE_KEY_FILE);
    fs::write(&private_path, private_key_hex(key)).map_err(|e| ProtocolError::io(&private_path, e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&private_path, fs::Permissions::from_mode(0o600))
            .map_err(|e| ProtocolError::io(&private_path, e))?;
    }
    let public_path = dir.join(PUBLIC_KEY_FILE);
    fs::write(&public_path, public_key_hex(key)).map_err(|e| ProtocolError::io(&public_path, e))?;
    Ok(())
}

pub fn load_keypair(dir: &Path) -> ProtocolResult<SigningKey> {
    let private_path = dir.join(PRIVATE_KEY_FILE);
    let raw = fs::read_to_string(&private_path).map_err(|e| ProtocolError::io(&private_path, e))?;
    parse_signing_key(&raw)
}

/// Loads the keypair from `dir`, generating and saving a fresh one when the
/// directory holds none yet.
pub fn load_or_generate_keypair(dir: &Path) -> ProtocolResult<SigningKey> {
    if dir.join(PRIVATE_KEY_FILE).is_file() {
        return load_keypair(dir);
    }
    let key = generate_keypair();
    save_keypair(dir, &key)?;
    tracing::info!(dir = %dir.display(), "Generated new device keypair");
    Ok(key)
}
