use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::der::pem;
use rsa::pkcs8::{DecodePublicKey, LineEnding};
use rsa::{Oaep, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Random bytes behind a key generated for a PEM recipient
const GENERATED_KEY_LEN: usize = 32;
pub const PEM_MESSAGE_LABEL: &str = "MESSAGE";

/// How the partition key is obtained and shipped
#[derive(Clone)]
pub enum KeySpec {
    /// The key is the passphrase itself. Nothing is embedded in the image.
    Passphrase(Zeroizing<String>),
    /// A random key is generated and embedded, wrapped for this RSA public key
    PemPublicKey(PathBuf),
}

impl KeySpec {
    pub fn passphrase<S: Into<String>>(passphrase: S) -> Self {
        Self::Passphrase(Zeroizing::new(passphrase.into()))
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passphrase(_) => f.write_str("Passphrase(<redacted>)"),
            Self::PemPublicKey(path) => f.debug_tuple("PemPublicKey").field(path).finish(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyDerivationError {
    #[error("passphrase is empty")]
    EmptyPassphrase,
    #[error("failed to generate a random key")]
    Random(#[source] rand::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum KeyWrapError {
    #[error("failed to read public key {path:?}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path:?} is not a PEM encoded RSA public key")]
    Parse { path: PathBuf },
    #[error("failed to encrypt key with RSA-OAEP")]
    Encrypt(#[source] rsa::Error),
    #[error("failed to PEM encode the wrapped key: {0}")]
    Armor(pem::Error),
}

/// Key material handed to the block encryption tool. Zeroed on drop.
pub struct PlaintextKey(Zeroizing<Vec<u8>>);

impl PlaintextKey {
    pub fn from_spec(spec: &KeySpec) -> Result<Self, KeyDerivationError> {
        match spec {
            KeySpec::Passphrase(passphrase) => {
                if passphrase.is_empty() {
                    return Err(KeyDerivationError::EmptyPassphrase);
                }
                Ok(Self(Zeroizing::new(passphrase.as_bytes().to_vec())))
            }
            KeySpec::PemPublicKey(_) => {
                let mut raw = Zeroizing::new([0u8; GENERATED_KEY_LEN]);
                OsRng.try_fill_bytes(raw.as_mut_slice()).map_err(|err| {
                    tracing::error!(?err, "failed to generate key");
                    KeyDerivationError::Random(err)
                })?;
                // cryptsetup reads the key as a passphrase, keep it printable
                Ok(Self(Zeroizing::new(
                    STANDARD.encode(raw.as_slice()).into_bytes(),
                )))
            }
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for PlaintextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlaintextKey(<redacted>)")
    }
}

/// Wraps the key for embedding. Passphrase keys have nothing to wrap.
pub fn wrap_key(spec: &KeySpec, key: &PlaintextKey) -> Result<Option<Vec<u8>>, KeyWrapError> {
    let path = match spec {
        KeySpec::Passphrase(_) => return Ok(None),
        KeySpec::PemPublicKey(path) => path,
    };

    let public_pem = std::fs::read_to_string(path).map_err(|err| {
        tracing::error!(?path, ?err, "failed to read public key");
        KeyWrapError::Read {
            path: path.clone(),
            source: err,
        }
    })?;
    let public_key = RsaPublicKey::from_public_key_pem(&public_pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&public_pem))
        .map_err(|_| {
            tracing::error!(?path, "failed to parse public key");
            KeyWrapError::Parse { path: path.clone() }
        })?;

    let encrypted = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|err| {
            tracing::error!(?err, "failed to encrypt key");
            KeyWrapError::Encrypt(err)
        })?;

    pem_armor(PEM_MESSAGE_LABEL, &encrypted)
        .map(Some)
        .map_err(|err| {
            tracing::error!(?err, "failed to armor wrapped key");
            KeyWrapError::Armor(err)
        })
}

fn pem_armor(label: &str, data: &[u8]) -> Result<Vec<u8>, pem::Error> {
    let mut buf = vec![0u8; pem::encoded_len(label, LineEnding::LF, data)?];
    let len = pem::encode(label, LineEnding::LF, data, &mut buf)?.len();
    buf.truncate(len);
    Ok(buf)
}
