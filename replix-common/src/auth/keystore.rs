use std::{collections::HashMap, fs, path::Path};

use ed25519_dalek::{
    pkcs8::{
        spki::der::pem::LineEnding, DecodePrivateKey, DecodePublicKey, EncodePrivateKey,
        EncodePublicKey,
    },
    SigningKey, VerifyingKey,
};
use tracing::info;

use crate::{error::ConfigurationError, utils::NodeId};

/// Key material of one node: its own signing key plus the public key of every
/// cluster participant. Read-only after load.
pub struct KeyStore {
    node_id: NodeId,
    signing_key: SigningKey,
    public_keys: HashMap<NodeId, VerifyingKey>,
}

impl KeyStore {
    /// Loads `<private_key_dir>/<node_id>.pem` and the JSON manifest of
    /// public keys.
    pub fn load(
        node_id: NodeId,
        private_key_dir: &Path,
        manifest_path: &Path,
    ) -> Result<Self, ConfigurationError> {
        let key_path = private_key_dir.join(format!("{}.pem", node_id));
        let pem = fs::read_to_string(&key_path)
            .map_err(|_| ConfigurationError::MissingPrivateKey(node_id.clone()))?;
        let signing_key = SigningKey::from_pkcs8_pem(pem.trim()).map_err(|e| {
            ConfigurationError::InvalidKey {
                path: key_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;

        let manifest = fs::read_to_string(manifest_path).map_err(|e| {
            ConfigurationError::InvalidKey {
                path: manifest_path.display().to_string(),
                reason: e.to_string(),
            }
        })?;
        let public_keys = Self::parse_manifest(&manifest, manifest_path)?;

        let store = Self::from_parts(node_id, signing_key, public_keys)?;
        info!(
            node = %store.node_id,
            peers = store.public_keys.len(),
            "🔑 Key material loaded"
        );
        Ok(store)
    }

    /// Assembles a store from already decoded keys. The local node's public
    /// key must be present and must belong to `signing_key`.
    pub fn from_parts(
        node_id: NodeId,
        signing_key: SigningKey,
        public_keys: HashMap<NodeId, VerifyingKey>,
    ) -> Result<Self, ConfigurationError> {
        match public_keys.get(&node_id) {
            None => return Err(ConfigurationError::UnknownSigner(node_id)),
            Some(own) if *own != signing_key.verifying_key() => {
                return Err(ConfigurationError::KeyMismatch(node_id))
            }
            Some(_) => {}
        }

        Ok(Self { node_id, signing_key, public_keys })
    }

    /// Parses a manifest of `node id -> SPKI PEM`. Literal `\n` escapes in the
    /// PEM text are turned back into newlines.
    pub fn parse_manifest(
        json: &str,
        origin: &Path,
    ) -> Result<HashMap<NodeId, VerifyingKey>, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidKey {
            path: origin.display().to_string(),
            reason,
        };

        let raw: HashMap<String, String> =
            serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;

        raw.into_iter()
            .map(|(id, pem)| {
                let pem = pem.replace("\\n", "\n");
                let key = VerifyingKey::from_public_key_pem(pem.trim())
                    .map_err(|e| invalid(format!("{}: {}", id, e)))?;
                Ok((NodeId(id), key))
            })
            .collect()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn public_key(&self, node_id: &NodeId) -> Result<&VerifyingKey, ConfigurationError> {
        self.public_keys
            .get(node_id)
            .ok_or_else(|| ConfigurationError::UnknownSigner(node_id.clone()))
    }

    pub fn knows(&self, node_id: &NodeId) -> bool {
        self.public_keys.contains_key(node_id)
    }
}

/// Encodes a key pair as `(PKCS#8 private PEM, SPKI public PEM)`.
pub fn encode_keypair(signing_key: &SigningKey) -> Result<(String, String), ConfigurationError> {
    let encode_err = |e: String| ConfigurationError::InvalidKey { path: "<generated>".into(), reason: e };

    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| encode_err(e.to_string()))?;
    let public_pem = signing_key
        .verifying_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| encode_err(e.to_string()))?;

    Ok((private_pem.to_string(), public_pem))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rand::rngs::OsRng;
    use std::path::PathBuf;

    /// Writes one private key per id plus a manifest into `dir` and returns
    /// `(private_dir, manifest_path)`.
    pub fn write_cluster_keys(dir: &Path, ids: &[&str]) -> (PathBuf, PathBuf) {
        let private_dir = dir.join("private");
        fs::create_dir_all(&private_dir).unwrap();

        let mut manifest = HashMap::new();
        for id in ids {
            let key = SigningKey::generate(&mut OsRng);
            let (private_pem, public_pem) = encode_keypair(&key).unwrap();
            fs::write(private_dir.join(format!("{}.pem", id)), private_pem).unwrap();
            manifest.insert(id.to_string(), public_pem.replace('\n', "\\n"));
        }

        let manifest_path = dir.join("manifest.json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
        (private_dir, manifest_path)
    }
}
