//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677), without channel binding.
//!
//! The pipeline is a sans-I/O record: it produces client messages and
//! consumes server messages, and the caller moves the bytes. All key material
//! is wiped when the pipeline is dropped.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{constants, ProtocolError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const MECHANISM: &str = "SCRAM-SHA-256";
pub const MECHANISM_PLUS: &str = "SCRAM-SHA-256-PLUS";

/// GS2 header for "client does not support channel binding".
const GS2_HEADER: &str = "n,,";
/// base64 of the GS2 header, echoed in client-final.
const CHANNEL_BINDING_NONE: &str = "biws";

const NONCE_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Initial,
    FirstSent,
    FinalSent,
    Verified,
}

/// Per-authentication SCRAM state.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ScramPipeline {
    user: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    expected_server_signature: Option<[u8; 32]>,
    #[zeroize(skip)]
    stage: Stage,
}

impl std::fmt::Debug for ScramPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramPipeline")
            .field("user", &self.user)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

fn auth_err(msg: impl Into<String>) -> ProtocolError {
    ProtocolError::Authentication(msg.into())
}

pub(crate) fn hmac(key: &[u8], data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|e| auth_err(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// `Hi(str, salt, i)`: PBKDF2 with HMAC-SHA-256 and a single output block.
pub(crate) fn hi(secret: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; 32]> {
    let mut first = salt.to_vec();
    first.extend_from_slice(&1u32.to_be_bytes());
    let mut prev = hmac(secret, &first)?;
    let mut acc = prev;
    for _ in 1..iterations {
        prev = hmac(secret, &prev)?;
        for (a, p) in acc.iter_mut().zip(prev.iter()) {
            *a ^= p;
        }
    }
    prev.zeroize();
    Ok(acc)
}

/// `saslname` escaping of the user name.
fn escape_username(user: &str) -> String {
    user.replace('=', "=3D").replace(',', "=2C")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn random_nonce() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(NONCE_LEN)
        .map(char::from)
        .collect()
}

impl ScramPipeline {
    pub fn new(user: &str, password: &str) -> Self {
        Self::with_nonce(user, password, &random_nonce())
    }

    /// Fixed client nonce; only tests should need this.
    pub fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self {
            user: user.to_string(),
            password: password.nfc().collect(),
            client_nonce: nonce.to_string(),
            client_first_bare: String::new(),
            expected_server_signature: None,
            stage: Stage::Initial,
        }
    }

    /// Step 1: `n,,n=<user>,r=<client nonce>`.
    pub fn client_first(&mut self) -> Result<Vec<u8>> {
        if self.stage != Stage::Initial {
            return Err(auth_err(constants::ERR_SCRAM_STATE));
        }
        self.client_first_bare = format!(
            "n={},r={}",
            escape_username(&self.user),
            self.client_nonce
        );
        self.stage = Stage::FirstSent;
        Ok(format!("{GS2_HEADER}{}", self.client_first_bare).into_bytes())
    }

    /// Steps 2 and 3: consume server-first, produce client-final with the proof.
    pub fn handle_server_first(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        if self.stage != Stage::FirstSent {
            return Err(auth_err(constants::ERR_SCRAM_STATE));
        }
        let server_first = std::str::from_utf8(data)
            .map_err(|_| auth_err("server-first-message is not UTF-8"))?;

        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                Some(("m", _)) => return Err(auth_err("unsupported SCRAM extension")),
                _ => {}
            }
        }
        let nonce = nonce.ok_or_else(|| auth_err("server-first-message lacks a nonce"))?;
        let salt = salt.ok_or_else(|| auth_err("server-first-message lacks a salt"))?;
        let iterations: u32 = iterations
            .ok_or_else(|| auth_err("server-first-message lacks an iteration count"))?
            .parse()
            .map_err(|_| auth_err("invalid SCRAM iteration count"))?;
        if iterations == 0 {
            return Err(auth_err("invalid SCRAM iteration count"));
        }
        if !nonce.starts_with(&self.client_nonce) || nonce.len() == self.client_nonce.len() {
            return Err(auth_err(constants::ERR_SERVER_NONCE));
        }
        let salt = BASE64
            .decode(salt)
            .map_err(|_| auth_err("invalid SCRAM salt encoding"))?;

        let mut salted_password = hi(self.password.as_bytes(), &salt, iterations)?;
        let mut client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key: [u8; 32] = Sha256::digest(client_key).into();

        let client_final_without_proof = format!("c={CHANNEL_BINDING_NONE},r={nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;
        let mut proof = client_key;
        for (p, s) in proof.iter_mut().zip(client_signature.iter()) {
            *p ^= s;
        }

        let server_key = hmac(&salted_password, b"Server Key")?;
        self.expected_server_signature = Some(hmac(&server_key, auth_message.as_bytes())?);

        salted_password.zeroize();
        client_key.zeroize();
        self.stage = Stage::FinalSent;
        Ok(format!("{client_final_without_proof},p={}", BASE64.encode(proof)).into_bytes())
    }

    /// Steps 4 and 5: check the server signature. Never skipped.
    pub fn verify_server_final(&mut self, data: &[u8]) -> Result<()> {
        if self.stage != Stage::FinalSent {
            return Err(auth_err(constants::ERR_SCRAM_STATE));
        }
        let server_final = std::str::from_utf8(data)
            .map_err(|_| auth_err("server-final-message is not UTF-8"))?;
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(auth_err(format!("server rejected SCRAM exchange: {err}")));
        }
        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .ok_or_else(|| auth_err("server-final-message lacks a verifier"))?;
        let signature = BASE64
            .decode(signature)
            .map_err(|_| auth_err(constants::ERR_SERVER_SIGNATURE))?;
        let expected = self
            .expected_server_signature
            .ok_or_else(|| auth_err(constants::ERR_SCRAM_STATE))?;
        if !constant_time_eq(&signature, &expected) {
            return Err(auth_err(constants::ERR_SERVER_SIGNATURE));
        }
        self.stage = Stage::Verified;
        Ok(())
    }

    pub fn is_verified(&self) -> bool {
        self.stage == Stage::Verified
    }
}
