//! Shared harness for the integration suites: a DID client that can walk the
//! full sign-in/did-auth flow, plus envelope helpers.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::{Map, Value};

use volary::auth::{AuthCore, ServerIdentity};
use volary::did::{Credential, DidDocument, JwtBuilder, Keypair, Presentation};
use volary::rpc::{Method, Request, Response};

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Unique scratch directory per invocation so parallel tests don't collide.
pub fn temp_dir(tag: &str) -> PathBuf {
    let pid = std::process::id();
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("volary-{tag}-{pid}-{ts}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Decode a compact JWT's claims without verifying it. Test-side only; the
/// server never does this.
pub fn jwt_claims(compact: &str) -> Map<String, Value> {
    let segment = compact.split('.').nth(1).expect("three-segment jwt");
    let raw = URL_SAFE_NO_PAD.decode(segment).expect("base64url claims");
    serde_json::from_slice(&raw).expect("json claims")
}

/// A client identity pair: the application instance that signs in, and the
/// user DID that issues its credential.
pub struct TestClient {
    pub app: Keypair,
    pub user: Keypair,
    pub doc: DidDocument,
}

impl TestClient {
    pub fn new() -> Self {
        let app = Keypair::generate();
        let doc = DidDocument::new_signed(&app, now_secs() + 30 * 24 * 3600);
        TestClient {
            app,
            user: Keypair::generate(),
            doc,
        }
    }

    pub fn doc_json(&self) -> String {
        self.doc.to_json().unwrap()
    }

    pub fn user_did(&self) -> String {
        self.user.did().as_str().to_string()
    }

    /// Build the did_auth JWT answering `challenge`, with full control over
    /// the realm for negative tests.
    pub fn answer_challenge_with_realm(&self, challenge: &str, realm: &str, name: &str) -> String {
        let nonce = jwt_claims(challenge)["nonce"]
            .as_str()
            .expect("challenge nonce")
            .to_string();

        let mut subject = Map::new();
        subject.insert("id".to_string(), self.app.did().as_str().into());
        subject.insert("appDid".to_string(), "did:vly:feeds-app".into());
        if !name.is_empty() {
            subject.insert("name".to_string(), name.into());
        }
        let credential = Credential::issue(
            &self.user,
            "app-instance-credential",
            subject,
            now_secs(),
            now_secs() + 3600,
        )
        .unwrap();

        let presentation =
            Presentation::create(&self.app, vec![credential], realm, &nonce).unwrap();

        JwtBuilder::new()
            .expiration(now_secs() + 60)
            .issuer(self.app.did().as_str())
            .subject("DIDAuthResponse")
            .claim("presentation", serde_json::to_value(&presentation).unwrap())
            .sign(&self.app)
            .unwrap()
    }

    pub fn answer_challenge(&self, challenge: &str, realm: &str) -> String {
        self.answer_challenge_with_realm(challenge, realm, "")
    }
}

/// An AuthCore with a fresh identity activated, rooted in `dir`.
pub fn ready_auth(dir: &PathBuf, challenge_ttl: u64, access_ttl: u64) -> AuthCore {
    let mut auth = AuthCore::new(dir, challenge_ttl, access_ttl);
    let identity = ServerIdentity::load_or_create(dir).unwrap();
    auth.activate(identity);
    auth
}

/// Walk the full sign_in -> did_auth flow and return the access token.
pub fn acquire_token(auth: &mut AuthCore, client: &TestClient, name: &str) -> String {
    let challenge = auth.sign_in(&client.doc_json()).unwrap();
    let realm = auth.server_did().unwrap().as_str().to_string();
    let response = client.answer_challenge_with_realm(&challenge, &realm, name);
    auth.did_auth(&response).unwrap()
}

pub fn request(tsx_id: u64, method: Method) -> Request {
    Request { tsx_id, method }
}

/// Split a drained queue into parsed responses and raw notification values.
pub fn split_messages(messages: Vec<Vec<u8>>) -> (Vec<Response>, Vec<Value>) {
    let mut responses = Vec::new();
    let mut notifications = Vec::new();
    for bytes in messages {
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        if value.get("tsx_id").is_some() {
            responses.push(serde_json::from_value(value).unwrap());
        } else {
            notifications.push(value);
        }
    }
    (responses, notifications)
}

/// Deserialize the single successful response out of a drained queue.
pub fn single_result<T: serde::de::DeserializeOwned>(messages: Vec<Vec<u8>>) -> T {
    let (responses, _) = split_messages(messages);
    assert_eq!(responses.len(), 1, "expected exactly one response");
    let response = responses.into_iter().next().unwrap();
    assert_eq!(response.ec, None, "expected success, got {:?}", response.ec);
    serde_json::from_value(response.result.expect("result payload")).unwrap()
}

/// Extract the single error code out of a drained queue.
pub fn single_error(messages: Vec<Vec<u8>>) -> i64 {
    let (responses, _) = split_messages(messages);
    assert_eq!(responses.len(), 1, "expected exactly one response");
    responses[0].ec.expect("expected an error response")
}
