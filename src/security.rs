use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::SecurityError;

const USER_AUTH_PUBLIC: &str = "user_auth.pem.pub";
const USER_AUTH_PRIVATE: &str = "user_auth.pem";

#[cfg(feature = "generate-security")]
const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Clone)]
pub struct KeySet {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

/// Key material used to sign and verify auth tokens.
#[derive(Debug, Clone)]
pub struct Security {
    pub jwt_keys: KeySet,
}

#[inline]
fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

impl Security {
    pub fn load() -> Result<Security, SecurityError> {
        Security::load_from(security_dir())
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Security, SecurityError> {
        let dir = dir.as_ref();

        tracing::info!("Loading JWT signing keys...");
        let pub_key = fs::read(dir.join(USER_AUTH_PUBLIC)).ok();
        let priv_key = fs::read(dir.join(USER_AUTH_PRIVATE)).ok();

        let jwt_keys = match (pub_key, priv_key) {
            (Some(public), Some(private)) if !public.is_empty() && !private.is_empty() => {
                tracing::info!("Loaded JWT keys.");
                KeySet { public, private }
            }
            #[cfg(feature = "generate-security")]
            _ => {
                tracing::info!(
                    "Unable to load private and/or public user auth key(s). Generating a new pair."
                );
                fs::create_dir_all(dir)?;
                let keys = generate_keys()?;

                fs::write(dir.join(USER_AUTH_PRIVATE), keys.private.as_slice())?;
                fs::write(dir.join(USER_AUTH_PUBLIC), keys.public.as_slice())?;

                tracing::info!("Done generating JWT keys.");
                keys
            }
            #[cfg(not(feature = "generate-security"))]
            _ => return Err(SecurityError::MissingKeys(dir.to_path_buf())),
        };

        Ok(Security { jwt_keys })
    }
}

#[cfg(feature = "generate-security")]
fn generate_keys() -> Result<KeySet, SecurityError> {
    use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};
    use rsa::pkcs8::EncodePublicKey;

    let key_err = |e: &dyn std::fmt::Display| SecurityError::KeyGeneration(e.to_string());

    tracing::info!("Generating a private RSA key...");
    let mut rng = rand::thread_rng();
    let rsa_sk = rsa::RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|e| key_err(&e))?;

    let private = rsa_sk
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| key_err(&e))?
        .to_string()
        .into_bytes();

    let public = rsa_sk
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| key_err(&e))?
        .into_bytes();

    Ok(KeySet { public, private })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_keys_are_loaded_verbatim() {
        let dir = env::temp_dir().join(format!("tutormatch-security-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(USER_AUTH_PUBLIC), b"public").unwrap();
        fs::write(dir.join(USER_AUTH_PRIVATE), b"private").unwrap();

        let security = Security::load_from(&dir).expect("keys present");
        assert_eq!(security.jwt_keys.public, b"public");
        assert_eq!(security.jwt_keys.private, b"private");

        fs::remove_dir_all(dir).ok();
    }
}
