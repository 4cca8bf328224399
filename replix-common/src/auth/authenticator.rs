use ed25519_dalek::{Signature, Signer, Verifier};

use crate::{
    auth::keystore::KeyStore,
    error::ReplixError,
    message::SignedEnvelope,
};

/// Signs and verifies envelopes with the node's [`KeyStore`].
pub struct MessageAuthenticator {
    keystore: KeyStore,
}

impl MessageAuthenticator {
    pub fn new(keystore: KeyStore) -> Self {
        Self { keystore }
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Bincode bytes of `message` with signer id and signature cleared.
    pub fn canonicalize<M: SignedEnvelope>(message: &M) -> Result<Vec<u8>, ReplixError> {
        let mut view = message.clone();
        view.clear_identity();
        Ok(bincode::serialize(&view)?)
    }

    /// Returns a copy of `message` signed by the local node.
    pub fn sign<M: SignedEnvelope>(&self, message: &M) -> Result<M, ReplixError> {
        let bytes = Self::canonicalize(message)?;
        let signature = self.keystore.signing_key().sign(&bytes);

        let mut signed = message.clone();
        signed.stamp(self.keystore.node_id().clone(), signature.to_vec());
        Ok(signed)
    }

    /// `Ok(false)` for a missing, malformed or mismatching signature. An
    /// unknown signer is a configuration error, not a failed check.
    pub fn verify<M: SignedEnvelope>(&self, message: &M) -> Result<bool, ReplixError> {
        let key = self.keystore.public_key(message.signer_id())?;

        let signature = match Signature::from_slice(message.signature()) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };

        let bytes = Self::canonicalize(message)?;
        match key.verify(&bytes, &signature) {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::keystore::fixtures::write_cluster_keys,
        error::ConfigurationError,
        message::{ClientRequest, Command, Transaction},
        utils::NodeId,
    };

    fn authenticator_for(dir: &std::path::Path, id: &str) -> MessageAuthenticator {
        let (private_dir, manifest) = write_cluster_keys(dir, &["C1", "n1"]);
        MessageAuthenticator::new(KeyStore::load(NodeId::from(id), &private_dir, &manifest).unwrap())
    }

    fn request() -> ClientRequest {
        ClientRequest::new(
            NodeId::from("C1"),
            1000,
            Command::Transfer(Transaction { sender: "C1".into(), receiver: "C2".into(), amount: 5 }),
        )
    }

    #[test]
    fn test_sign_then_verify() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator_for(dir.path(), "C1");

        let original = request();
        let signed = auth.sign(&original).unwrap();

        assert_eq!(signed.signer_id, NodeId::from("C1"));
        assert_eq!(signed.signature.len(), 64);
        assert!(original.signature.is_empty(), "input must stay untouched");
        assert!(auth.verify(&signed).unwrap());
    }

    #[test]
    fn test_canonical_bytes_ignore_identity_fields() {
        let mut a = request();
        let mut b = request();
        a.signer_id = NodeId::from("x");
        a.signature = vec![9; 64];
        b.signer_id = NodeId::from("y");

        assert_eq!(
            MessageAuthenticator::canonicalize(&a).unwrap(),
            MessageAuthenticator::canonicalize(&b).unwrap()
        );
    }

    #[test]
    fn test_tampering_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator_for(dir.path(), "C1");
        let signed = auth.sign(&request()).unwrap();

        let mut tampered = signed.clone();
        tampered.timestamp += 1;
        assert!(!auth.verify(&tampered).unwrap());

        let mut bad_sig = signed.clone();
        bad_sig.signature[0] ^= 0xff;
        assert!(!auth.verify(&bad_sig).unwrap());

        let mut short_sig = signed;
        short_sig.signature.truncate(10);
        assert!(!auth.verify(&short_sig).unwrap());
    }

    #[test]
    fn test_missing_signature_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator_for(dir.path(), "n1");

        let mut unsigned = request();
        unsigned.signer_id = NodeId::from("C1");
        assert!(!auth.verify(&unsigned).unwrap());
    }

    #[test]
    fn test_unknown_signer_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator_for(dir.path(), "C1");

        let mut signed = auth.sign(&request()).unwrap();
        signed.signer_id = NodeId::from("intruder");

        let err = auth.verify(&signed).unwrap_err();
        assert!(matches!(
            err,
            ReplixError::Configuration(ConfigurationError::UnknownSigner(_))
        ));
    }
}
