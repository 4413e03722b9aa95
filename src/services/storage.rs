use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};

/// Length of the AES-GCM nonce prepended to every stored blob.
const NONCE_LEN: usize = 12;

// ── Store contract ──────────────────────────────────────────────────────────

/// Durable storage for original document images, keyed by `image_key`.
/// Callers see plaintext; what lands at rest is the implementation's business.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn store(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;
    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    /// Blob is truncated, tampered with, or sealed under a different key.
    #[error("Decryption failed")]
    DecryptFailed,
}

// ── R2 implementation ───────────────────────────────────────────────────────

/// S3-compatible object storage (Cloudflare R2) holding medical images sealed
/// with AES-256-GCM. Each object is `nonce (12 bytes) || ciphertext` uploaded
/// as `application/octet-stream`.
pub struct R2ImageStore {
    bucket: Box<Bucket>,
    cipher: Aes256Gcm,
}

impl R2ImageStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        key_base64: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            cipher: cipher_from_key(key_base64)?,
        })
    }
}

#[async_trait]
impl ImageStore for R2ImageStore {
    async fn store(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let sealed = seal(&self.cipher, data)?;
        self.bucket
            .put_object_with_content_type(key, &sealed, "application/octet-stream")
            .await?;
        Ok(())
    }

    async fn fetch(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await?;
        open(&self.cipher, &response.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await?;
        Ok(())
    }
}

// ── Sealing ─────────────────────────────────────────────────────────────────

fn cipher_from_key(key_base64: &str) -> Result<Aes256Gcm, StorageError> {
    use base64::Engine;
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(key_base64)
        .map_err(|_| StorageError::InvalidKey)?;

    if key_bytes.len() != 32 {
        return Err(StorageError::InvalidKey);
    }

    Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| StorageError::InvalidKey)
}

/// Encrypts plaintext under a fresh random nonce; output is nonce || ciphertext.
fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>, StorageError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| StorageError::EncryptFailed)?;

    let mut output = nonce.to_vec();
    output.extend(ciphertext);
    Ok(output)
}

fn open(cipher: &Aes256Gcm, data: &[u8]) -> Result<Vec<u8>, StorageError> {
    if data.len() < NONCE_LEN {
        return Err(StorageError::DecryptFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| StorageError::DecryptFailed)
}

// ── Tests ───────────────────────────────────────────────────────────────────
