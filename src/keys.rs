use std::fs::OpenOptions;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};

use russh::keys::signature::rand_core::OsRng;
use russh::keys::{Algorithm, EcdsaCurve, HashAlg, PrivateKey};

use crate::config::Config;

/// The server's host keys together with the files they live in (the file
/// list is what a host-keys proof request would be logged with).
pub struct HostKeys {
    pub keys: Vec<PrivateKey>,
    pub files: Vec<PathBuf>,
}

/// Load the configured host keys, or generate a default set into the data
/// directory. A key that cannot be read or written becomes ephemeral rather
/// than aborting startup.
pub fn load_or_generate(cfg: &Config, data_dir: &Path) -> HostKeys {
    let named: Vec<(PathBuf, Algorithm)> = if cfg.server.host_keys.is_empty() {
        vec![
            (data_dir.join("host_key_ed25519"), Algorithm::Ed25519),
            (
                data_dir.join("host_key_rsa"),
                Algorithm::Rsa {
                    hash: Some(HashAlg::Sha512),
                },
            ),
            (
                data_dir.join("host_key_ecdsa"),
                Algorithm::Ecdsa {
                    curve: EcdsaCurve::NistP256,
                },
            ),
        ]
    } else {
        cfg.server
            .host_keys
            .iter()
            .map(|path| (path.clone(), Algorithm::Ed25519))
            .collect()
    };

    let mut keys = Vec::with_capacity(named.len());
    let mut files = Vec::with_capacity(named.len());
    for (path, algorithm) in named {
        keys.push(load_or_create_key(&path, algorithm));
        files.push(path);
    }
    HostKeys { keys, files }
}

fn load_or_create_key(path: &Path, algorithm: Algorithm) -> PrivateKey {
    log::debug!("Loading host key from {}", path.display());
    match OpenOptions::new().read(true).open(path) {
        Ok(mut file) => {
            let mut buffer = Vec::new();
            match file.read_to_end(&mut buffer) {
                Ok(0) => {
                    log::warn!("Host key file {} is empty, regenerating", path.display());
                    generate_key(path, algorithm)
                }
                Ok(_) => match PrivateKey::from_bytes(buffer.as_slice()) {
                    Ok(key) => key,
                    Err(err) => {
                        log::warn!(
                            "Failed to parse host key {}: {}. Using an ephemeral key",
                            path.display(),
                            err
                        );
                        ephemeral_key(algorithm)
                    }
                },
                Err(err) => {
                    log::warn!(
                        "Failed to read host key {}: {}. Using an ephemeral key",
                        path.display(),
                        err
                    );
                    ephemeral_key(algorithm)
                }
            }
        }
        Err(err) if err.kind() == ErrorKind::NotFound => generate_key(path, algorithm),
        Err(err) => {
            log::warn!(
                "Failed to open host key {}: {}. Using an ephemeral key",
                path.display(),
                err
            );
            ephemeral_key(algorithm)
        }
    }
}

fn ephemeral_key(algorithm: Algorithm) -> PrivateKey {
    PrivateKey::random(&mut OsRng, algorithm).expect("key generation failed")
}

fn generate_key(path: &Path, algorithm: Algorithm) -> PrivateKey {
    log::info!("Generating host key {}", path.display());
    let key = ephemeral_key(algorithm.clone());
    match key.to_bytes() {
        Ok(bytes) => {
            if let Err(err) = std::fs::write(path, bytes) {
                log::warn!("Failed to write host key {}: {}", path.display(), err);
            }
        }
        Err(err) => {
            log::warn!("Failed to encode host key {}: {}", path.display(), err);
        }
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::default();
        let first = load_or_generate(&cfg, dir.path());
        assert_eq!(first.keys.len(), 3);
        assert_eq!(first.files.len(), 3);
        for file in &first.files {
            assert!(file.exists(), "{} not written", file.display());
        }
        // A second load picks up the same keys instead of generating new ones.
        let second = load_or_generate(&cfg, dir.path());
        assert_eq!(
            first.keys[0].public_key().to_openssh().unwrap(),
            second.keys[0].public_key().to_openssh().unwrap()
        );
    }

    #[test]
    fn configured_key_paths_are_respected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.server.host_keys = vec![dir.path().join("only_key")];
        let keys = load_or_generate(&cfg, dir.path());
        assert_eq!(keys.keys.len(), 1);
        assert_eq!(keys.files[0], dir.path().join("only_key"));
        assert!(keys.files[0].exists());
    }
}
