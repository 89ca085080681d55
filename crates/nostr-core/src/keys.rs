//! Key pair types: hex/bech32 codecs, NIP-04 shared-secret encryption, and
//! BIP-340 Schnorr signing.
//!
//! The ECDH shared secret deliberately departs from textbook ECDH: it takes
//! the raw x-coordinate of the shared point with no hashing step, matching
//! the wire format every other Nostr client expects.

use aes::Aes256;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use secp256k1::{
    ecdh, rand::rngs::OsRng, schnorr, Keypair, Message, Parity, Secp256k1,
    SecretKey as Secp256SecretKey, XOnlyPublicKey,
};

use crate::bech32::{self, Variant};
use crate::error::{NostrError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// A secp256k1 secret key, serialized as a bare 32-byte scalar (no DER).
#[derive(Clone)]
pub struct SecretKey(Secp256SecretKey);

/// A secp256k1 x-only public key, as used in Nostr event ids and bech32 `npub`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(XOnlyPublicKey);

impl SecretKey {
    pub fn generate() -> Self {
        let (sk, _) = Secp256k1::new().generate_keypair(&mut OsRng);
        SecretKey(sk)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| NostrError::Decode(e.to_string()))?;
        let sk = Secp256SecretKey::from_slice(&bytes)
            .map_err(|e| NostrError::Crypto(e.to_string()))?;
        Ok(SecretKey(sk))
    }

    pub fn from_bech32(nsec: &str) -> Result<Self> {
        let (hrp, raw, _variant) = bech32::decode(nsec, false)?;
        if hrp != "nsec" {
            return Err(NostrError::MalformedAddress(format!(
                "expected hrp `nsec`, got `{hrp}`"
            )));
        }
        let sk = Secp256SecretKey::from_slice(&raw).map_err(|e| NostrError::Crypto(e.to_string()))?;
        Ok(SecretKey(sk))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0.secret_bytes())
    }

    pub fn bech32(&self) -> Result<String> {
        bech32::encode("nsec", &self.0.secret_bytes(), Variant::Bech32)
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &self.0);
        let (xonly, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        PublicKey(xonly)
    }

    /// Raw shared-secret x-coordinate with `other`, with no hashing applied —
    /// this is what NIP-04 actually encrypts under, not the SHA-256-hashed
    /// output `ecdh::SharedSecret::new` produces. `shared_secret_point`
    /// returns the uncompressed 64-byte point; only the leading 32 bytes
    /// (its x-coordinate) are used.
    fn ecdh_raw(&self, other: &PublicKey) -> [u8; 32] {
        let full_point = other.0.public_key(Parity::Even);
        let point = ecdh::shared_secret_point(&full_point, &self.0);
        let mut out = [0u8; 32];
        out.copy_from_slice(&point[..32]);
        out
    }

    /// NIP-04 encryption: AES-256-CBC with a random IV, PKCS#7 padding,
    /// rendered as `base64(ciphertext)?iv=base64(iv)`.
    pub fn encrypt_message(&self, plaintext: &str, recipient: &PublicKey) -> Result<String> {
        let key = self.ecdh_raw(recipient);
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new(&key.into(), &iv.into());
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        Ok(format!(
            "{}?iv={}",
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &ciphertext),
            base64::Engine::encode(&base64::engine::general_purpose::STANDARD, iv)
        ))
    }

    /// Inverse of [`SecretKey::encrypt_message`]. `sender` is the public key
    /// that encrypted the message (the DM's `pubkey` field when decrypting
    /// as recipient, or the recipient tag's key when decrypting your own
    /// sent message back).
    pub fn decrypt_message(&self, payload: &str, sender: &PublicKey) -> Result<String> {
        let (ciphertext_b64, iv_b64) = payload
            .split_once("?iv=")
            .ok_or_else(|| NostrError::Decode("payload missing `?iv=` marker".into()))?;

        let ciphertext = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, ciphertext_b64)
            .map_err(|e| NostrError::Decode(e.to_string()))?;
        let iv = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, iv_b64)
            .map_err(|e| NostrError::Decode(e.to_string()))?;
        let iv: [u8; 16] = iv
            .try_into()
            .map_err(|_| NostrError::Decode("iv must be 16 bytes".into()))?;

        let key = self.ecdh_raw(sender);
        let cipher = Aes256CbcDec::new(&key.into(), &iv.into());
        let mut buf = ciphertext;
        let plaintext = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| NostrError::Crypto(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext.to_vec()).map_err(|e| NostrError::Decode(e.to_string()))
    }

    /// BIP-340 Schnorr signature over a 32-byte message digest, with
    /// caller-supplied auxiliary randomness for reproducible test vectors.
    pub fn sign_with_aux_rand(&self, digest: &[u8; 32], aux_rand: &[u8; 32]) -> schnorr::Signature {
        let secp = Secp256k1::new();
        let keypair = Keypair::from_secret_key(&secp, &self.0);
        let msg = Message::from_digest(*digest);
        secp.sign_schnorr_with_aux_rand(&msg, &keypair, aux_rand)
    }

    /// BIP-340 Schnorr signature with fresh randomness for the nonce.
    pub fn sign(&self, digest: &[u8; 32]) -> schnorr::Signature {
        let mut aux_rand = [0u8; 32];
        OsRng.fill_bytes(&mut aux_rand);
        self.sign_with_aux_rand(digest, &aux_rand)
    }
}

impl PublicKey {
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| NostrError::Decode(e.to_string()))?;
        let xonly = XOnlyPublicKey::from_slice(&bytes).map_err(|e| NostrError::Crypto(e.to_string()))?;
        Ok(PublicKey(xonly))
    }

    pub fn from_bech32(npub: &str) -> Result<Self> {
        let (hrp, raw, _variant) = bech32::decode(npub, false)?;
        if hrp != "npub" {
            return Err(NostrError::MalformedAddress(format!(
                "expected hrp `npub`, got `{hrp}`"
            )));
        }
        let xonly = XOnlyPublicKey::from_slice(&raw).map_err(|e| NostrError::Crypto(e.to_string()))?;
        Ok(PublicKey(xonly))
    }

    pub fn hex(&self) -> String {
        hex::encode(self.0.serialize())
    }

    pub fn bech32(&self) -> Result<String> {
        bech32::encode("npub", &self.0.serialize(), Variant::Bech32)
    }

    /// Verifies a BIP-340 signature. Per the event model, this never throws:
    /// a malformed signature is simply not valid for any message.
    pub fn verify(&self, digest: &[u8; 32], signature: &schnorr::Signature) -> bool {
        let secp = Secp256k1::new();
        let msg = Message::from_digest(*digest);
        secp.verify_schnorr(signature, &msg, &self.0).is_ok()
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretKey").field(&"<redacted>").finish()
    }
}
