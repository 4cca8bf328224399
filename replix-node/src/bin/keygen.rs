use std::{collections::BTreeMap, fs, path::PathBuf};

use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use replix_common::auth::keystore::encode_keypair;

/// Generates one Ed25519 key pair per node plus the shared public-key manifest.
#[derive(Debug, Parser)]
#[command(name = "replix-keygen", version, about)]
struct Args {
    /// Output directory; private keys go to `<out-dir>/private/<id>.pem`.
    #[arg(long, default_value = "keys")]
    out_dir: PathBuf,

    /// Node ids to generate keys for (replicas and clients).
    #[arg(required = true)]
    ids: Vec<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let private_dir = args.out_dir.join("private");
    fs::create_dir_all(&private_dir)?;

    let mut manifest = BTreeMap::new();
    for id in &args.ids {
        let signing_key = SigningKey::generate(&mut OsRng);
        let (private_pem, public_pem) = encode_keypair(&signing_key)?;

        let key_path = private_dir.join(format!("{}.pem", id));
        fs::write(&key_path, private_pem)?;
        manifest.insert(id.clone(), public_pem);
        println!("🔑 {} -> {}", id, key_path.display());
    }

    let manifest_path = args.out_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
    println!("📜 Manifest with {} keys written to {}", manifest.len(), manifest_path.display());

    Ok(())
}
