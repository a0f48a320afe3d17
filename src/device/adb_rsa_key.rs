//! Key Store: persistent RSA-2048 key material with a stable fingerprint,
//! the custom little-endian ADB public-key blob, and PKCS#1 v1.5 signing of
//! the AUTH challenge token.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use byteorder::{LittleEndian, WriteBytesExt};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::hazmat::PrehashSigner;
use rsa::signature::SignatureEncoding;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::constants::*;
use crate::error::{Result, RustADBError};

const RSA_KEY_BITS: usize = 2048;

#[derive(Clone)]
pub struct ADBRsaKey {
    private_key: RsaPrivateKey,
}

impl fmt::Debug for ADBRsaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ADBRsaKey").finish_non_exhaustive()
    }
}

fn key_paths(data_dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let key_dir = data_dir.join(KEY_DIR_NAME);
    (
        key_dir.join(PRIVATE_KEY_FILE),
        key_dir.join(PUBLIC_KEY_FILE),
        key_dir.join(PUBLIC_KEY_ADB_FILE),
    )
}

fn atomic_write(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| format!("{}.tmp", n.to_string_lossy()))
        .unwrap_or_else(|| "key.tmp".to_string());
    let tmp_path = path.with_file_name(file_name);

    fs::write(&tmp_path, contents)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp_path, fs::Permissions::from_mode(mode))?;
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn biguint_to_words_le(value: &BigUint, word_count: usize) -> Vec<u32> {
    let bytes = value.to_bytes_le();
    let mut words = vec![0u32; word_count];
    for (i, chunk) in bytes.chunks(4).enumerate() {
        if i >= word_count {
            break;
        }
        let mut word_bytes = [0u8; 4];
        word_bytes[..chunk.len()].copy_from_slice(chunk);
        words[i] = u32::from_le_bytes(word_bytes);
    }
    words
}

/// Newton-Raphson inverse of an odd `n0` modulo 2^32: starting from `x = 1`
/// (correct to 1 bit), each iteration doubles the number of correct bits, so
/// 5 rounds suffice to converge across all 32 bits.
fn mod_inverse_u32(n0: u32) -> u32 {
    let mut x: u32 = 1;
    for _ in 0..5 {
        x = x.wrapping_mul(2u32.wrapping_sub(n0.wrapping_mul(x)));
    }
    x
}

impl ADBRsaKey {
    fn generate() -> Result<Self> {
        let mut rng = rand::rng();
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| RustADBError::RsaError(e.to_string()))?;
        Ok(Self { private_key })
    }

    fn load_from_disk(private_path: &Path, public_path: &Path) -> Result<Self> {
        let private_pem = fs::read_to_string(private_path)?;
        let private_key = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| RustADBError::KeyCorrupted(format!("private key: {e}")))?;

        // The X.509 form only needs to exist and parse; it is re-derived from
        // the private key for all actual use, so a mismatching-but-valid
        // public.pub file is not itself an error here — only unparsable
        // content is.
        let public_pem = fs::read_to_string(public_path)?;
        RsaPublicKey::from_public_key_pem(&public_pem)
            .map_err(|e| RustADBError::KeyCorrupted(format!("public key: {e}")))?;

        Ok(Self { private_key })
    }

    fn write_private_atomic(&self, path: &Path) -> Result<()> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| RustADBError::RsaError(e.to_string()))?;
        atomic_write(path, pem.as_bytes(), 0o600)
    }

    fn write_public_atomic(&self, path: &Path) -> Result<()> {
        let pubkey = RsaPublicKey::from(&self.private_key);
        let pem = pubkey
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| RustADBError::RsaError(e.to_string()))?;
        atomic_write(path, pem.as_bytes(), 0o644)
    }

    fn write_adb_blob_atomic(&self, path: &Path) -> Result<()> {
        let blob = self.public_key_adb_blob()?;
        atomic_write(path, blob.as_bytes(), 0o644)
    }

    /// Loads existing key material, failing rather than regenerating if the
    /// files exist but cannot be parsed.
    pub fn load_keypair(data_dir: &Path) -> Result<Self> {
        let (private_path, public_path, _) = key_paths(data_dir);
        Self::load_from_disk(&private_path, &public_path)
    }

    /// Generates a fresh keypair only if the private or X.509 public form is
    /// missing; otherwise loads the existing one. Regenerates the ADB blob
    /// form alone (without touching the keypair, so the fingerprint never
    /// changes) when only it is missing.
    pub fn ensure_keys(data_dir: &Path) -> Result<Self> {
        let (private_path, public_path, adb_path) = key_paths(data_dir);
        if let Some(key_dir) = private_path.parent() {
            fs::create_dir_all(key_dir)?;
        }

        let key = if private_path.exists() && public_path.exists() {
            Self::load_from_disk(&private_path, &public_path)?
        } else {
            let key = Self::generate()?;
            key.write_private_atomic(&private_path)?;
            key.write_public_atomic(&public_path)?;
            key
        };

        if !adb_path.exists() {
            key.write_adb_blob_atomic(&adb_path)?;
        }

        Ok(key)
    }

    pub fn trust_sentinel_path(data_dir: &Path) -> PathBuf {
        data_dir.join(KEY_DIR_NAME).join(TRUST_SENTINEL_FILE)
    }

    pub fn is_trust_established(data_dir: &Path) -> bool {
        Self::trust_sentinel_path(data_dir).exists()
    }

    pub fn mark_trust_established(data_dir: &Path) -> Result<()> {
        let path = Self::trust_sentinel_path(data_dir);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, [])?;
        Ok(())
    }

    /// SHA-256 of the X.509 SubjectPublicKeyInfo DER encoding, hex-lowercase.
    /// Stable across restarts for as long as the keypair is unchanged.
    pub fn fingerprint(&self) -> Result<String> {
        let pubkey = RsaPublicKey::from(&self.private_key);
        let der = pubkey
            .to_public_key_der()
            .map_err(|e| RustADBError::RsaError(e.to_string()))?;
        let mut hasher = Sha256::new();
        hasher.update(der.as_bytes());
        let digest = hasher.finalize();
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Encodes this key's public half into the 524-byte ADB blob format,
    /// base64, suffixed with the identity string the device expects.
    pub fn public_key_adb_blob(&self) -> Result<String> {
        let pubkey = RsaPublicKey::from(&self.private_key);
        let n = pubkey.n();
        let e = pubkey.e();

        let word_count = ADB_PUBKEY_WORD_COUNT as usize;
        let n_words = biguint_to_words_le(n, word_count);

        let n0inv = mod_inverse_u32(n_words[0]).wrapping_neg();

        let r = BigUint::from(1u32) << (word_count * 32);
        let rr = (&r * &r) % n;
        let rr_words = biguint_to_words_le(&rr, word_count);

        let e_u32 = biguint_to_words_le(e, 1)[0];

        let mut blob = Vec::with_capacity(4 + 4 + word_count * 4 * 2 + 4);
        blob.write_u32::<LittleEndian>(word_count as u32)?;
        blob.write_u32::<LittleEndian>(n0inv)?;
        for w in &n_words {
            blob.write_u32::<LittleEndian>(*w)?;
        }
        for w in &rr_words {
            blob.write_u32::<LittleEndian>(*w)?;
        }
        blob.write_u32::<LittleEndian>(e_u32)?;

        debug_assert_eq!(blob.len(), 524);

        let encoded = base64::engine::general_purpose::STANDARD.encode(&blob);
        Ok(format!("{encoded}{ADB_PUBKEY_SUFFIX}"))
    }

    /// Signs a (typically 20-byte) AUTH challenge token: PKCS#1 v1.5 over
    /// SHA-1 with the DigestInfo prefix applied, raw RSA private-key
    /// operation, no additional padding from the RSA primitive itself. The
    /// token is zero-padded or truncated to exactly 20 bytes first.
    pub fn sign(&self, token: &[u8]) -> Result<Vec<u8>> {
        let mut digest = [0u8; 20];
        let n = token.len().min(20);
        digest[..n].copy_from_slice(&token[..n]);

        let signing_key = SigningKey::<Sha1>::new(self.private_key.clone());
        let signature = signing_key
            .sign_prehash(&digest)
            .map_err(|e| RustADBError::RsaError(e.to_string()))?;
        Ok(signature.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::VerifyingKey;
    use rsa::signature::hazmat::PrehashVerifier;
    use tempfile::tempdir;

    #[test]
    fn sign_is_verifiable() {
        let key = ADBRsaKey::generate().unwrap();
        let token = [7u8; 20];
        let signature_bytes = key.sign(&token).unwrap();

        let verifying_key: VerifyingKey<Sha1> =
            VerifyingKey::new(RsaPublicKey::from(&key.private_key));
        let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()).unwrap();
        verifying_key.verify_prehash(&token, &signature).unwrap();
    }

    #[test]
    fn sign_pads_short_tokens() {
        let key = ADBRsaKey::generate().unwrap();
        let short_token = [9u8; 5];
        assert_eq!(key.sign(&short_token).unwrap().len(), RSA_KEY_SIZE_BYTES);
    }

    #[test]
    fn public_key_blob_is_524_bytes_before_encoding() {
        let key = ADBRsaKey::generate().unwrap();
        let blob = key.public_key_adb_blob().unwrap();
        assert!(blob.ends_with(ADB_PUBKEY_SUFFIX));
        let b64_part = &blob[..blob.len() - ADB_PUBKEY_SUFFIX.len()];
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(b64_part)
            .unwrap();
        assert_eq!(decoded.len(), 524);
    }

    #[test]
    fn fingerprint_stable_across_restarts() {
        let dir = tempdir().unwrap();
        let key1 = ADBRsaKey::ensure_keys(dir.path()).unwrap();
        let fp1 = key1.fingerprint().unwrap();

        // Simulate a process restart: load fresh from the same directory.
        let key2 = ADBRsaKey::ensure_keys(dir.path()).unwrap();
        let fp2 = key2.fingerprint().unwrap();

        assert_eq!(fp1, fp2);
    }

    #[test]
    fn missing_adb_blob_is_rederived_without_changing_fingerprint() {
        let dir = tempdir().unwrap();
        let key1 = ADBRsaKey::ensure_keys(dir.path()).unwrap();
        let fp1 = key1.fingerprint().unwrap();
        let blob1 = key1.public_key_adb_blob().unwrap();

        let (_, _, adb_path) = key_paths(dir.path());
        fs::remove_file(&adb_path).unwrap();

        let key2 = ADBRsaKey::ensure_keys(dir.path()).unwrap();
        assert_eq!(key2.fingerprint().unwrap(), fp1);
        assert_eq!(fs::read_to_string(&adb_path).unwrap(), blob1);
    }

    #[test]
    fn corrupted_private_key_is_not_silently_regenerated() {
        let dir = tempdir().unwrap();
        let _key = ADBRsaKey::ensure_keys(dir.path()).unwrap();
        let (priv_path, _, _) = key_paths(dir.path());
        fs::write(&priv_path, b"not a key").unwrap();

        let err = ADBRsaKey::ensure_keys(dir.path()).unwrap_err();
        assert!(matches!(err, RustADBError::KeyCorrupted(_)));
    }
}
