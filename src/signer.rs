//! Checkpoint note signing and verification (§4.3, §6 `Signer(s)`).
//!
//! A checkpoint note is a signed-note-style text blob: an origin line, a
//! decimal size, a base64 root, a blank line, then one `-- name sig` line
//! per signer. The body (everything before the blank line) is exactly what
//! gets signed, so a verifier never needs to reconstruct it from parts.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

use crate::error::{Error, Result};
use crate::hash::NodeHash;

/// Something that can sign a checkpoint body. `ed25519_dalek` signing is
/// synchronous (no I/O), so this trait is too.
pub trait Signer: Send + Sync {
    fn name(&self) -> &str;
    fn sign(&self, message: &[u8]) -> Vec<u8>;
}

/// Counterpart to [`Signer`], used by the log-state tracker to check a
/// fetched checkpoint's signatures.
pub trait Verifier: Send + Sync {
    fn name(&self) -> &str;
    fn verify(&self, message: &[u8], signature: &[u8]) -> bool;
}

pub struct Ed25519Signer {
    name: String,
    key: SigningKey,
}

impl Ed25519Signer {
    #[must_use]
    pub fn new(name: impl Into<String>, key: SigningKey) -> Self {
        Self { name: name.into(), key }
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    #[must_use]
    pub fn verifier(&self) -> Ed25519Verifier {
        Ed25519Verifier {
            name: self.name.clone(),
            key: self.verifying_key(),
        }
    }
}

impl Signer for Ed25519Signer {
    fn name(&self) -> &str {
        &self.name
    }

    fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.key.sign(message).to_bytes().to_vec()
    }
}

pub struct Ed25519Verifier {
    name: String,
    key: VerifyingKey,
}

impl Ed25519Verifier {
    #[must_use]
    pub fn new(name: impl Into<String>, key: VerifyingKey) -> Self {
        Self { name: name.into(), key }
    }
}

impl Verifier for Ed25519Verifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let sig = Signature::from_bytes(&bytes);
        self.key.verify(message, &sig).is_ok()
    }
}

/// A checkpoint note, decoded but not cryptographically verified — that is
/// [`ParsedCheckpoint::verify`]'s job, against a caller-supplied verifier
/// set, since parsing and trust are separate concerns (§4.5 `Update`).
#[derive(Debug, Clone)]
pub struct ParsedCheckpoint {
    pub origin: String,
    pub size: u64,
    pub root: NodeHash,
    body: Vec<u8>,
    signatures: Vec<(String, Vec<u8>)>,
}

impl ParsedCheckpoint {
    /// Names of every signer on this note, in the order they signed.
    #[must_use]
    pub fn signer_names(&self) -> Vec<&str> {
        self.signatures.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Verifies that at least one configured verifier's signature is
    /// present and valid. Returns the names of verifiers that matched.
    pub fn verify(&self, verifiers: &[&dyn Verifier]) -> Result<Vec<String>> {
        let mut matched = Vec::new();
        for verifier in verifiers {
            if let Some((_, sig)) = self.signatures.iter().find(|(name, _)| name == verifier.name()) {
                if verifier.verify(&self.body, sig) {
                    matched.push(verifier.name().to_string());
                }
            }
        }
        if matched.is_empty() {
            return Err(Error::SignatureInvalid(
                "no configured verifier matched a valid signature".into(),
            ));
        }
        Ok(matched)
    }
}

/// Formats `(origin, size, root)` into a note body and signs it with
/// `primary` and every signer in `additional`, in that order.
#[must_use]
pub fn format_checkpoint(
    origin: &str,
    size: u64,
    root: NodeHash,
    primary: &dyn Signer,
    additional: &[&dyn Signer],
) -> Vec<u8> {
    let body = format!("{origin}\n{size}\n{}\n", BASE64.encode(root.as_bytes()));
    let mut note = body.clone().into_bytes();
    note.push(b'\n');
    for signer in std::iter::once(primary).chain(additional.iter().copied()) {
        let sig = signer.sign(body.as_bytes());
        note.extend_from_slice(format!("-- {} {}\n", signer.name(), BASE64.encode(sig)).as_bytes());
    }
    note
}

/// Parses a note produced by [`format_checkpoint`] (or a wire-compatible
/// one) into its body fields and raw signature lines.
pub fn parse_checkpoint(note: &[u8]) -> Result<ParsedCheckpoint> {
    let text = std::str::from_utf8(note).map_err(|_| Error::Malformed("checkpoint is not utf-8".into()))?;
    let (body_text, rest) = text
        .split_once("\n\n")
        .ok_or_else(|| Error::Malformed("checkpoint missing body/signature separator".into()))?;

    let mut lines = body_text.lines();
    let origin = lines
        .next()
        .ok_or_else(|| Error::Malformed("checkpoint missing origin line".into()))?
        .to_string();
    let size: u64 = lines
        .next()
        .ok_or_else(|| Error::Malformed("checkpoint missing size line".into()))?
        .parse()
        .map_err(|_| Error::Malformed("checkpoint size is not a decimal integer".into()))?;
    let root_b64 = lines
        .next()
        .ok_or_else(|| Error::Malformed("checkpoint missing root line".into()))?;
    let root_bytes = BASE64
        .decode(root_b64)
        .map_err(|_| Error::Malformed("checkpoint root is not valid base64".into()))?;
    let root = NodeHash::from_slice(&root_bytes).ok_or_else(|| Error::Malformed("checkpoint root has the wrong length".into()))?;

    let mut signatures = Vec::new();
    for line in rest.lines() {
        if line.is_empty() {
            continue;
        }
        let rest = line
            .strip_prefix("-- ")
            .ok_or_else(|| Error::Malformed("malformed checkpoint signature line".into()))?;
        let (name, sig_b64) = rest
            .split_once(' ')
            .ok_or_else(|| Error::Malformed("malformed checkpoint signature line".into()))?;
        let sig = BASE64
            .decode(sig_b64)
            .map_err(|_| Error::Malformed("checkpoint signature is not valid base64".into()))?;
        signatures.push((name.to_string(), sig));
    }
    if signatures.is_empty() {
        return Err(Error::Malformed("checkpoint has no signatures".into()));
    }

    Ok(ParsedCheckpoint {
        origin,
        size,
        root,
        body: format!("{body_text}\n").into_bytes(),
        signatures,
    })
}
