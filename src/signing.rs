// src/signing.rs
//! Component descriptor signing
//!
//! Signs the normalised digest of a descriptor with Ed25519 and records the
//! result in the descriptor's signature list. Keys are stored as small TOML
//! files holding the base64-encoded key.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::descriptor::normalize::normalized_digest;
use crate::descriptor::{ComponentDescriptor, Signature, SignatureSpec};
use crate::error::{Error, Result};

/// Signature algorithm name
pub const ED25519: &str = "ed25519";

/// Media type of the signature value
pub const SIGNATURE_MEDIA_TYPE: &str = "application/vnd.ocm.signature.ed25519";

/// An Ed25519 key pair for signing descriptors
pub struct SigningKeyPair {
    signing_key: SigningKey,
    key_id: Option<String>,
}

impl SigningKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        Self {
            signing_key: key,
            key_id: None,
        }
    }

    /// Set the issuer recorded in signatures
    pub fn with_key_id(mut self, id: &str) -> Self {
        self.key_id = Some(id.to_string());
        self
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.verifying_key().as_bytes())
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Sign `cd` under `name`, replacing an existing signature of that name
    pub fn sign_descriptor(&self, cd: &mut ComponentDescriptor, name: &str) -> Result<Signature> {
        let digest = normalized_digest(cd)?;
        let payload = digest_bytes(&digest.value)?;
        let value = self.signing_key.sign(&payload);
        let signature = Signature {
            name: name.to_string(),
            digest,
            signature: SignatureSpec {
                algorithm: ED25519.to_string(),
                value: BASE64.encode(value.to_bytes()),
                media_type: SIGNATURE_MEDIA_TYPE.to_string(),
                issuer: self.key_id.clone(),
            },
        };
        cd.set_signature(signature.clone());
        Ok(signature)
    }

    /// Write the private and public key files
    pub fn save_to_files(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        let private_data = KeyFile {
            algorithm: ED25519.to_string(),
            key: BASE64.encode(self.signing_key.to_bytes()),
            key_id: self.key_id.clone(),
        };
        write_key_file(private_path, &private_data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(private_path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(private_path, perms)?;
        }

        let public_data = KeyFile {
            algorithm: ED25519.to_string(),
            key: self.public_key_base64(),
            key_id: self.key_id.clone(),
        };
        write_key_file(public_path, &public_data)
    }

    /// Load a key pair from a private key file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let key_file = read_key_file(path)?;
        let key_array = decode_key(&key_file.key)?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&key_array),
            key_id: key_file.key_id,
        })
    }
}

/// Key file format
#[derive(Debug, Serialize, Deserialize)]
struct KeyFile {
    algorithm: String,
    key: String,
    #[serde(default)]
    key_id: Option<String>,
}

fn write_key_file(path: &Path, data: &KeyFile) -> Result<()> {
    let text = toml::to_string_pretty(data)
        .map_err(|e| Error::SignatureError(format!("cannot encode key file: {}", e)))?;
    fs::write(path, text).map_err(|e| {
        Error::IoError(format!("failed to write key file {}: {}", path.display(), e))
    })
}

fn read_key_file(path: &Path) -> Result<KeyFile> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::IoError(format!("failed to read key file {}: {}", path.display(), e))
    })?;
    let key_file: KeyFile = toml::from_str(&content).map_err(|e| {
        Error::ParseError(format!("failed to parse key file {}: {}", path.display(), e))
    })?;
    if key_file.algorithm != ED25519 {
        return Err(Error::SignatureError(format!(
            "unsupported key algorithm: {}",
            key_file.algorithm
        )));
    }
    Ok(key_file)
}

fn decode_key(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| Error::SignatureError(format!("invalid base64 in key: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::SignatureError("invalid key length".to_string()))
}

fn digest_bytes(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| Error::SignatureError(format!("invalid digest value: {}", e)))
}

/// Load a public key from a key file
pub fn load_public_key(path: &Path) -> Result<VerifyingKey> {
    let key_file = read_key_file(path)?;
    let key_array = decode_key(&key_file.key)?;
    VerifyingKey::from_bytes(&key_array)
        .map_err(|e| Error::SignatureError(format!("invalid public key: {}", e)))
}

/// Verify the signature `name` of `cd` against `key`
///
/// Fails when the descriptor changed in a signature-relevant way since it
/// was signed or the signature value does not match.
pub fn verify_descriptor(cd: &ComponentDescriptor, name: &str, key: &VerifyingKey) -> Result<()> {
    let signature = cd
        .signature_by_name(name)
        .ok_or_else(|| Error::not_found("signature", format!("{} of {}", name, cd.id())))?;
    if signature.signature.algorithm != ED25519 {
        return Err(Error::SignatureError(format!(
            "unsupported signature algorithm: {}",
            signature.signature.algorithm
        )));
    }
    let digest = normalized_digest(cd)?;
    if digest != signature.digest {
        return Err(Error::SignatureError(format!(
            "digest of {} changed since signing with {}",
            cd.id(),
            name
        )));
    }
    let bytes = BASE64
        .decode(&signature.signature.value)
        .map_err(|e| Error::SignatureError(format!("invalid base64 in signature: {}", e)))?;
    let value = ed25519_dalek::Signature::from_slice(&bytes)
        .map_err(|e| Error::SignatureError(format!("malformed signature: {}", e)))?;
    key.verify_strict(&digest_bytes(&digest.value)?, &value)
        .map_err(|e| Error::SignatureError(format!("signature {} invalid: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Label, Resource, AccessSpec, DigestSpec};
    use tempfile::TempDir;

    fn descriptor() -> ComponentDescriptor {
        let mut cd = ComponentDescriptor::new("acme.org/app", "1.0.0");
        cd.provider.name = "acme".to_string();
        let mut res = Resource::new("image", "ociImage", AccessSpec::oci("ghcr.io/acme/app:1.0.0"));
        res.digest = Some(DigestSpec::for_blob(b"image"));
        cd.resources.push(res);
        cd
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = SigningKeyPair::generate().with_key_id("release");
        let mut cd = descriptor();
        let signature = keypair.sign_descriptor(&mut cd, "acme").unwrap();
        assert_eq!(signature.signature.issuer.as_deref(), Some("release"));
        assert_eq!(cd.signatures.len(), 1);
        verify_descriptor(&cd, "acme", &keypair.verifying_key()).unwrap();
    }

    #[test]
    fn test_volatile_changes_keep_signature_valid() {
        let keypair = SigningKeyPair::generate();
        let mut cd = descriptor();
        keypair.sign_descriptor(&mut cd, "acme").unwrap();
        cd.labels.set(Label::new("audit", "passed"));
        cd.resources[0].access = AccessSpec::local_blob("sha256:abc", "application/octet-stream");
        verify_descriptor(&cd, "acme", &keypair.verifying_key()).unwrap();

        cd.labels.set(Label::signing("purpose", "prod"));
        let err = verify_descriptor(&cd, "acme", &keypair.verifying_key()).unwrap_err();
        assert!(matches!(err, Error::SignatureError(_)));
    }

    #[test]
    fn test_verify_with_wrong_key() {
        let mut cd = descriptor();
        SigningKeyPair::generate().sign_descriptor(&mut cd, "acme").unwrap();
        let other = SigningKeyPair::generate();
        assert!(verify_descriptor(&cd, "acme", &other.verifying_key()).is_err());
        assert!(verify_descriptor(&cd, "missing", &other.verifying_key())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let private_path = temp_dir.path().join("key.private");
        let public_path = temp_dir.path().join("key.public");

        let keypair = SigningKeyPair::generate().with_key_id("test-key");
        keypair.save_to_files(&private_path, &public_path).unwrap();

        let loaded = SigningKeyPair::load_from_file(&private_path).unwrap();
        assert_eq!(loaded.public_key_base64(), keypair.public_key_base64());
        assert_eq!(loaded.key_id(), Some("test-key"));
        assert_eq!(load_public_key(&public_path).unwrap(), keypair.verifying_key());
    }
}
