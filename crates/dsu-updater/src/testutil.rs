//! Test-only helpers: a minisign-compatible signer, metadata builders and
//! fake host collaborators.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use blake2::{Blake2b512, Digest};
use ed25519_dalek::{Signer, SigningKey};
use tokio::sync::Notify;

use crate::error::UpdateError;
use crate::host::{Dialog, NativeUpdater, Prompt, PromptKind};
use crate::transport::Fetcher;

/// Produces minisign public keys and detached signatures from a fixed seed.
pub struct TestSigner {
    signing_key: SigningKey,
    key_id: [u8; 8],
}

impl TestSigner {
    pub fn from_seed(seed: u8) -> Self {
        let mut key_id = [seed; 8];
        key_id[0] = 0xA5;
        Self {
            signing_key: SigningKey::from_bytes(&[seed; 32]),
            key_id,
        }
    }

    /// The bare base64 public key line.
    pub fn public_key_line(&self) -> String {
        let mut blob = Vec::with_capacity(42);
        blob.extend_from_slice(b"Ed");
        blob.extend_from_slice(&self.key_id);
        blob.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        STANDARD.encode(blob)
    }

    /// The two-line public key box as written by minisign.
    pub fn public_key_box(&self) -> String {
        format!(
            "untrusted comment: minisign public key {}\n{}\n",
            hex::encode_upper(self.key_id),
            self.public_key_line()
        )
    }

    /// Legacy signature over the raw payload.
    pub fn sign(&self, data: &[u8]) -> String {
        self.encode(*b"Ed", data)
    }

    /// Prehashed signature over the BLAKE2b-512 digest of the payload.
    pub fn sign_prehashed(&self, data: &[u8]) -> String {
        let digest = Blake2b512::digest(data);
        self.encode(*b"ED", &digest)
    }

    fn encode(&self, algorithm: [u8; 2], signed: &[u8]) -> String {
        let signature = self.signing_key.sign(signed).to_bytes();

        let mut blob = Vec::with_capacity(74);
        blob.extend_from_slice(&algorithm);
        blob.extend_from_slice(&self.key_id);
        blob.extend_from_slice(&signature);

        let trusted_comment = "timestamp:1700000000\tfile:update";
        let mut global = signature.to_vec();
        global.extend_from_slice(trusted_comment.as_bytes());
        let global_signature = self.signing_key.sign(&global).to_bytes();

        format!(
            "untrusted comment: signature from minisign secret key\n{}\ntrusted comment: {}\n{}\n",
            STANDARD.encode(blob),
            trusted_comment,
            STANDARD.encode(global_signature)
        )
    }
}

/// JSON body of a version descriptor, on a single line.
pub fn metadata_json(version: &str, binary_path: &str, binary_signature: &str, notes: &str) -> String {
    serde_json::json!({
        "version": version,
        "binary": {
            "binaryPath": binary_path,
            "binarySignature": binary_signature,
        },
        "releaseNotes": notes,
        "timestamp": 1700000000,
    })
    .to_string()
}

/// Full wire document: JSON, newline, detached signature over the JSON.
pub fn signed_metadata(signer: &TestSigner, json: &str) -> String {
    format!("{}\n{}", json, signer.sign(json.as_bytes()))
}

/// Canned response for [`FakeFetcher`].
#[derive(Clone)]
pub enum FakeResponse {
    Body(Vec<u8>),
    Status(u16),
    Unreachable,
}

/// In-memory update server. When `gate` is set, each fetch signals the
/// first `Notify` and waits for the second before answering.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    pub responses: Arc<Mutex<HashMap<String, FakeResponse>>>,
    pub requests: Arc<Mutex<Vec<String>>>,
    pub gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

impl FakeFetcher {
    pub fn respond(&self, path: &str, response: FakeResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(path.to_string(), response);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests for anything other than metadata.
    pub fn binary_requests(&self) -> usize {
        self.requests()
            .iter()
            .filter(|path| !path.ends_with(".json"))
            .count()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, path: &str, dest: &Path) -> Result<u64, UpdateError> {
        self.requests.lock().unwrap().push(path.to_string());
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }

        let response = self.responses.lock().unwrap().get(path).cloned();
        match response {
            Some(FakeResponse::Body(body)) => {
                tokio::fs::write(dest, &body).await?;
                Ok(body.len() as u64)
            }
            Some(FakeResponse::Status(status)) => Err(UpdateError::UnexpectedStatus { status }),
            Some(FakeResponse::Unreachable) | None => {
                Err(UpdateError::NetworkError("connection refused".to_string()))
            }
        }
    }
}

/// Scripted dialog; answers "later" once the script runs out.
#[derive(Clone, Default)]
pub struct FakeDialog {
    pub answers: Arc<Mutex<VecDeque<Result<usize, ()>>>>,
    pub shown: Arc<Mutex<Vec<Prompt>>>,
}

impl FakeDialog {
    pub fn answer(&self, answer: Result<usize, ()>) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn shown(&self) -> Vec<Prompt> {
        self.shown.lock().unwrap().clone()
    }

    pub fn error_prompts(&self) -> usize {
        self.shown()
            .iter()
            .filter(|p| p.kind == PromptKind::Error)
            .count()
    }
}

#[async_trait]
impl Dialog for FakeDialog {
    async fn show_choice(&self, prompt: &Prompt) -> Result<usize, UpdateError> {
        self.shown.lock().unwrap().push(prompt.clone());
        match self.answers.lock().unwrap().pop_front() {
            Some(Ok(choice)) => Ok(choice),
            Some(Err(())) => Err(UpdateError::DialogError("no display".to_string())),
            None => Ok(1),
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeNativeUpdater {
    pub feeds: Arc<Mutex<Vec<String>>>,
    pub checks: Arc<Mutex<usize>>,
    pub installs: Arc<Mutex<usize>>,
    pub reject: Arc<Mutex<bool>>,
}

#[async_trait]
impl NativeUpdater for FakeNativeUpdater {
    fn set_feed_url(&self, url: &str) -> Result<(), UpdateError> {
        self.feeds.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn check_for_updates(&self) -> Result<(), UpdateError> {
        *self.checks.lock().unwrap() += 1;
        if *self.reject.lock().unwrap() {
            return Err(UpdateError::NativeUpdaterError("package rejected".to_string()));
        }
        Ok(())
    }

    fn quit_and_install(&self) -> Result<(), UpdateError> {
        *self.installs.lock().unwrap() += 1;
        Ok(())
    }
}
