//! # Value Transformer
//!
//! Optional per-value compression and encryption, applied to the value
//! payload only — never to the header or key. The two stages compose in a
//! fixed order: compress-then-encrypt on the way in, decrypt-then-decompress
//! on the way out. The segment CRC is computed over the transformed bytes as
//! they lie on disk.
//!
//! Compression is Snappy (raw format). Encryption is AES-CBC with PKCS#7
//! padding; a fresh random IV of one block is generated per value and
//! prepended to the ciphertext. The secret length selects the AES variant:
//! 16 bytes for AES-128, 24 for AES-192, 32 for AES-256.
//!
//! The transformer is configured once before the first I/O and treated as
//! immutable afterwards; it is shared freely across reader threads.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes192, Aes256};
use rand::RngCore;

use crate::error::{Result, StoreError};

const FLAG_ENCRYPTION: u8 = 1;
const FLAG_COMPRESSION: u8 = 1 << 1;

/// AES block size; also the IV length prepended to each ciphertext.
const AES_BLOCK_SIZE: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcEnc = cbc::Encryptor<Aes192>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// Applies the configured value transforms. See the module docs for the
/// composition order and framing.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    flags: u8,
    secret: Vec<u8>,
}

impl Transformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_compression(&mut self) {
        self.flags |= FLAG_COMPRESSION;
    }

    /// Enables encryption with the given secret. The secret must be a valid
    /// AES key length (16, 24, or 32 bytes).
    pub fn enable_encryption(&mut self, secret: &[u8]) -> Result<()> {
        if !matches!(secret.len(), 16 | 24 | 32) {
            return Err(StoreError::SecretLength(secret.len()));
        }
        self.secret = secret.to_vec();
        self.flags |= FLAG_ENCRYPTION;
        Ok(())
    }

    pub fn compression_enabled(&self) -> bool {
        self.flags & FLAG_COMPRESSION != 0
    }

    pub fn encryption_enabled(&self) -> bool {
        self.flags & FLAG_ENCRYPTION != 0
    }

    /// Transforms a plaintext payload into its on-disk form.
    pub fn encode(&self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        if self.compression_enabled() {
            data = snap::raw::Encoder::new()
                .compress_vec(&data)
                .map_err(|err| StoreError::Transform(format!("snappy compress: {err}")))?;
        }
        if self.encryption_enabled() {
            data = self.encrypt(&data)?;
        }
        Ok(data)
    }

    /// Inverts [`Transformer::encode`]: decrypt, then decompress.
    pub fn decode(&self, mut data: Vec<u8>) -> Result<Vec<u8>> {
        if self.encryption_enabled() {
            data = self.decrypt(&data)?;
        }
        if self.compression_enabled() {
            data = snap::raw::Decoder::new()
                .decompress_vec(&data)
                .map_err(|err| StoreError::Transform(format!("snappy decompress: {err}")))?;
        }
        Ok(data)
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut iv = [0u8; AES_BLOCK_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = match self.secret.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.secret, &iv)
                .map_err(|err| StoreError::Transform(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            24 => Aes192CbcEnc::new_from_slices(&self.secret, &iv)
                .map_err(|err| StoreError::Transform(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            32 => Aes256CbcEnc::new_from_slices(&self.secret, &iv)
                .map_err(|err| StoreError::Transform(err.to_string()))?
                .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
            len => return Err(StoreError::SecretLength(len)),
        };

        let mut framed = Vec::with_capacity(AES_BLOCK_SIZE + ciphertext.len());
        framed.extend_from_slice(&iv);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < AES_BLOCK_SIZE || (data.len() - AES_BLOCK_SIZE) % AES_BLOCK_SIZE != 0 {
            return Err(StoreError::Transform(format!(
                "ciphertext length {} is not a whole number of blocks",
                data.len()
            )));
        }
        let (iv, ciphertext) = data.split_at(AES_BLOCK_SIZE);

        let plaintext = match self.secret.len() {
            16 => Aes128CbcDec::new_from_slices(&self.secret, iv)
                .map_err(|err| StoreError::Transform(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            24 => Aes192CbcDec::new_from_slices(&self.secret, iv)
                .map_err(|err| StoreError::Transform(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            32 => Aes256CbcDec::new_from_slices(&self.secret, iv)
                .map_err(|err| StoreError::Transform(err.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            len => return Err(StoreError::SecretLength(len)),
        };

        plaintext.map_err(|_| StoreError::Transform("bad padding or wrong secret".into()))
    }
}
