//! Cipher registry.
//!
//! Suites are identified by the name persisted in the filesystem config.
//! Sealed output is `nonce || ciphertext || tag` for the AEAD suites and
//! `iv || ciphertext` for the legacy CFB suites (which carry no tag; the
//! integrity envelope above is the only protection those blocks get).

use aead::{Aead, AeadCore, Payload};
use aes::{Aes128, Aes256};
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm};
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use chacha20poly1305::XChaCha20Poly1305;
use cipher::consts::U12;
use cipher::KeySizeUser;
use rand::RngCore;
use serpent::Serpent;
use twofish::Twofish;

use crate::crypto::key::EncryptionKey;

/// GCM composition over the Twofish block cipher.
type TwofishGcm = AesGcm<Twofish, U12>;
/// GCM composition over the Serpent block cipher.
type SerpentGcm = AesGcm<Serpent, U12>;

/// AES block length, which is also the CFB IV length.
const CFB_IV_LEN: usize = 16;

// ============================================================================
// Cipher Suite
// ============================================================================

/// The closed set of supported block ciphers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherSuite {
    /// AES-256 in GCM (the default)
    Aes256Gcm,
    /// AES-128 in GCM
    Aes128Gcm,
    /// XChaCha20-Poly1305
    XChaCha20Poly1305,
    /// Twofish in GCM
    TwofishGcm,
    /// Serpent in GCM
    SerpentGcm,
    /// AES-256 in CFB, legacy filesystems only
    Aes256Cfb,
    /// AES-128 in CFB, legacy filesystems only
    Aes128Cfb,
}

impl CipherSuite {
    /// The default suite for new filesystems.
    pub const DEFAULT: CipherSuite = CipherSuite::Aes256Gcm;

    /// All supported suites.
    pub const ALL: [CipherSuite; 7] = [
        CipherSuite::Aes256Gcm,
        CipherSuite::Aes128Gcm,
        CipherSuite::XChaCha20Poly1305,
        CipherSuite::TwofishGcm,
        CipherSuite::SerpentGcm,
        CipherSuite::Aes256Cfb,
        CipherSuite::Aes128Cfb,
    ];

    /// Look a suite up by its persisted name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    /// The name persisted in the config.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "aes-256-gcm",
            Self::Aes128Gcm => "aes-128-gcm",
            Self::XChaCha20Poly1305 => "xchacha20-poly1305",
            Self::TwofishGcm => "twofish-256-gcm",
            Self::SerpentGcm => "serpent-256-gcm",
            Self::Aes256Cfb => "aes-256-cfb",
            Self::Aes128Cfb => "aes-128-cfb",
        }
    }

    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes256Gcm => <Aes256Gcm as KeySizeUser>::key_size(),
            Self::Aes128Gcm => <Aes128Gcm as KeySizeUser>::key_size(),
            Self::XChaCha20Poly1305 => <XChaCha20Poly1305 as KeySizeUser>::key_size(),
            Self::TwofishGcm => <TwofishGcm as KeySizeUser>::key_size(),
            Self::SerpentGcm => <SerpentGcm as KeySizeUser>::key_size(),
            Self::Aes256Cfb => <Aes256 as KeySizeUser>::key_size(),
            Self::Aes128Cfb => <Aes128 as KeySizeUser>::key_size(),
        }
    }

    /// Bytes of overhead `seal` adds on top of the plaintext.
    pub fn overhead(&self) -> usize {
        match self {
            Self::Aes256Gcm | Self::Aes128Gcm | Self::TwofishGcm | Self::SerpentGcm => 12 + 16,
            Self::XChaCha20Poly1305 => 24 + 16,
            Self::Aes256Cfb | Self::Aes128Cfb => CFB_IV_LEN,
        }
    }

    /// Does this suite authenticate its ciphertext
    #[inline]
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::Aes256Cfb | Self::Aes128Cfb)
    }

    /// Generate a key of the right length for this suite.
    pub fn generate_key(&self) -> EncryptionKey {
        EncryptionKey::generate(self.key_len())
    }

    /// Encrypt `plaintext`, binding `aad`.
    pub fn seal(&self, key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Aes256Gcm => seal_aead::<Aes256Gcm>(key, plaintext, aad),
            Self::Aes128Gcm => seal_aead::<Aes128Gcm>(key, plaintext, aad),
            Self::XChaCha20Poly1305 => seal_aead::<XChaCha20Poly1305>(key, plaintext, aad),
            Self::TwofishGcm => seal_aead::<TwofishGcm>(key, plaintext, aad),
            Self::SerpentGcm => seal_aead::<SerpentGcm>(key, plaintext, aad),
            Self::Aes256Cfb => seal_cfb::<Aes256>(key, plaintext),
            Self::Aes128Cfb => seal_cfb::<Aes128>(key, plaintext),
        }
    }

    /// Decrypt and authenticate. None means tampered, truncated, or (for
    /// AEAD suites) a wrong key. CFB suites cannot detect tampering here.
    pub fn open(&self, key: &EncryptionKey, sealed: &[u8], aad: &[u8]) -> Option<Vec<u8>> {
        match self {
            Self::Aes256Gcm => open_aead::<Aes256Gcm>(key, sealed, aad),
            Self::Aes128Gcm => open_aead::<Aes128Gcm>(key, sealed, aad),
            Self::XChaCha20Poly1305 => open_aead::<XChaCha20Poly1305>(key, sealed, aad),
            Self::TwofishGcm => open_aead::<TwofishGcm>(key, sealed, aad),
            Self::SerpentGcm => open_aead::<SerpentGcm>(key, sealed, aad),
            Self::Aes256Cfb => open_cfb::<Aes256>(key, sealed),
            Self::Aes128Cfb => open_cfb::<Aes128>(key, sealed),
        }
    }
}

// ============================================================================
// AEAD plumbing
// ============================================================================

fn seal_aead<C>(key: &EncryptionKey, plaintext: &[u8], aad: &[u8]) -> Option<Vec<u8>>
where
    C: Aead + AeadCore + aead::KeyInit,
{
    let cipher = C::new_from_slice(key.as_bytes()).ok()?;
    let mut nonce = aead::Nonce::<C>::default();
    rand::thread_rng().fill_bytes(nonce.as_mut_slice());
    let ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .ok()?;
    let mut out = Vec::with_capacity(nonce.as_slice().len() + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Some(out)
}

fn open_aead<C>(key: &EncryptionKey, sealed: &[u8], aad: &[u8]) -> Option<Vec<u8>>
where
    C: Aead + AeadCore + aead::KeyInit,
{
    let nonce_len = aead::Nonce::<C>::default().as_slice().len();
    if sealed.len() < nonce_len {
        return None;
    }
    let (nonce, ciphertext) = sealed.split_at(nonce_len);
    let cipher = C::new_from_slice(key.as_bytes()).ok()?;
    cipher
        .decrypt(
            aead::Nonce::<C>::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .ok()
}

// ============================================================================
// Legacy CFB plumbing
// ============================================================================

fn seal_cfb<C>(key: &EncryptionKey, plaintext: &[u8]) -> Option<Vec<u8>>
where
    C: cipher::BlockCipher + cipher::BlockEncryptMut + cipher::KeyInit + Clone,
{
    let mut iv = [0u8; CFB_IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    let enc = cfb_mode::Encryptor::<C>::new_from_slices(key.as_bytes(), &iv).ok()?;
    let mut out = Vec::with_capacity(CFB_IV_LEN + plaintext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(plaintext);
    enc.encrypt(&mut out[CFB_IV_LEN..]);
    Some(out)
}

fn open_cfb<C>(key: &EncryptionKey, sealed: &[u8]) -> Option<Vec<u8>>
where
    C: cipher::BlockCipher + cipher::BlockEncryptMut + cipher::KeyInit + Clone,
{
    if sealed.len() < CFB_IV_LEN {
        return None;
    }
    let (iv, ciphertext) = sealed.split_at(CFB_IV_LEN);
    let dec = cfb_mode::Decryptor::<C>::new_from_slices(key.as_bytes(), iv).ok()?;
    let mut out = ciphertext.to_vec();
    dec.decrypt(&mut out);
    Some(out)
}

// ============================================================================
// Tests
// ============================================================================
