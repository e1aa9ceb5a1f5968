//! DID challenge/response authentication.
//!
//! Two-step flow: `sign_in` takes the client's DID document and answers with
//! a short-lived challenge JWT carrying a random nonce; `did_auth` takes a
//! JWT-wrapped verifiable presentation that must answer that nonce, and
//! issues a bearer access token. Nonces are single-use: answering a
//! challenge consumes it.
//!
//! Every precondition failure has its own error variant with a stable wire
//! code, so clients can distinguish a stale nonce from a bad realm from a
//! malformed credential.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::NONCE_BYTES;
use crate::did::{
    verify_jwt_with_key, verify_jwt_with_resolver, Did, DidDocument, DidError, JwtBuilder,
    Keypair, Presentation,
};
use crate::doccache::DocCache;

/// Lifetime of a freshly created server document.
const SERVER_DOC_LIFETIME_SECS: u64 = 5 * 365 * 24 * 3600;

const CHALLENGE_SUBJECT: &str = "DIDAuthChallenge";
const ACCESS_TOKEN_SUBJECT: &str = "AccessToken";

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug)]
pub enum AuthError {
    NotReady,
    Io(std::io::Error),
    BadDidDoc,
    DidDocInvalid,
    BadDid,
    BadDidString,
    SaveDocFailed,
    BadJwtBuilder,
    BadJwtHeader,
    BadJwtExpiration,
    BadJwtAudience,
    BadJwtSubject,
    BadJwtClaim,
    JwtSignFailed,
    JwtCompactFailed,
    BadJwtChallenge,
    GetJwsClaimFailed,
    GetPresentationFailed,
    InvalidPresentation,
    PresentationEmptyNonce,
    PresentationBadNonce,
    PresentationEmptyRealm,
    PresentationBadRealm,
    VerifiableCredentialBadCount,
    VerifiableCredentialNotExists,
    VerifiableCredentialInvalid,
    CredentialNotExists,
    CredentialSerialFailed,
    CredentialParseFailed,
    CredentialInvalid,
    CredentialSubjectNotExists,
    CredentialSubjectIdNotExists,
    CredentialSubjectBadInstanceId,
    CredentialSubjectAppIdNotExists,
    NonceExpired,
    CredentialIssuerNotExists,
    CredentialExpiration,
    AccessTokenExpired,
    BadAccessToken,
}

impl AuthError {
    /// Stable wire code for error responses.
    pub fn code(&self) -> i64 {
        match self {
            AuthError::NotReady => -200,
            AuthError::Io(_) => -201,
            AuthError::BadDidDoc => -202,
            AuthError::DidDocInvalid => -203,
            AuthError::BadDid => -204,
            AuthError::BadDidString => -205,
            AuthError::SaveDocFailed => -206,
            AuthError::BadJwtBuilder => -207,
            AuthError::BadJwtHeader => -208,
            AuthError::BadJwtExpiration => -209,
            AuthError::BadJwtAudience => -210,
            AuthError::BadJwtSubject => -211,
            AuthError::BadJwtClaim => -212,
            AuthError::JwtSignFailed => -213,
            AuthError::JwtCompactFailed => -214,
            AuthError::BadJwtChallenge => -215,
            AuthError::GetJwsClaimFailed => -216,
            AuthError::GetPresentationFailed => -217,
            AuthError::InvalidPresentation => -218,
            AuthError::PresentationEmptyNonce => -219,
            AuthError::PresentationBadNonce => -220,
            AuthError::PresentationEmptyRealm => -221,
            AuthError::PresentationBadRealm => -222,
            AuthError::VerifiableCredentialBadCount => -223,
            AuthError::VerifiableCredentialNotExists => -224,
            AuthError::VerifiableCredentialInvalid => -225,
            AuthError::CredentialNotExists => -226,
            AuthError::CredentialSerialFailed => -227,
            AuthError::CredentialParseFailed => -228,
            AuthError::CredentialInvalid => -229,
            AuthError::CredentialSubjectNotExists => -230,
            AuthError::CredentialSubjectIdNotExists => -231,
            AuthError::CredentialSubjectBadInstanceId => -232,
            AuthError::CredentialSubjectAppIdNotExists => -233,
            AuthError::NonceExpired => -234,
            AuthError::CredentialIssuerNotExists => -235,
            AuthError::CredentialExpiration => -236,
            AuthError::AccessTokenExpired => -237,
            AuthError::BadAccessToken => -238,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::Io(e) => write!(f, "auth io error: {e}"),
            other => write!(f, "auth error {} ({:?})", other.code(), other),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<std::io::Error> for AuthError {
    fn from(e: std::io::Error) -> Self {
        AuthError::Io(e)
    }
}

// ---------------------------------------------------------------------------
// Server identity
// ---------------------------------------------------------------------------

/// Persisted form of the server keypair and its self-signed document.
#[derive(Serialize, Deserialize)]
struct IdentityFile {
    did: Did,
    secret_key_hex: String,
    document: DidDocument,
}

/// The node's own DID, keypair, and document.
pub struct ServerIdentity {
    pub did: Did,
    pub keypair: Keypair,
    pub document: DidDocument,
}

impl ServerIdentity {
    /// Load `identity.json` from the data directory, creating a fresh
    /// identity on first run.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, AuthError> {
        let path = data_dir.join("identity.json");
        if path.exists() {
            let contents = fs::read_to_string(&path)?;
            let file: IdentityFile =
                serde_json::from_str(&contents).map_err(|_| AuthError::BadDidDoc)?;
            let keypair =
                Keypair::from_secret_hex(&file.secret_key_hex).map_err(|_| AuthError::BadDid)?;
            vlogi!("auth: loaded server identity {}", file.did);
            return Ok(ServerIdentity {
                did: file.did,
                keypair,
                document: file.document,
            });
        }

        let keypair = Keypair::generate();
        let did = keypair.did();
        let document = DidDocument::new_signed(&keypair, now_secs() + SERVER_DOC_LIFETIME_SECS);
        let file = IdentityFile {
            did: did.clone(),
            secret_key_hex: keypair.secret_hex(),
            document: document.clone(),
        };
        fs::create_dir_all(data_dir)?;
        let contents = serde_json::to_string_pretty(&file)
            .expect("identity file serialization is infallible");
        fs::write(&path, contents)?;
        vlogi!("auth: created server identity {did}");
        Ok(ServerIdentity {
            did,
            keypair,
            document,
        })
    }
}

// ---------------------------------------------------------------------------
// Auth core
// ---------------------------------------------------------------------------

/// One outstanding sign-in challenge, keyed by its nonce.
#[derive(Debug, Clone)]
pub struct AuthSecret {
    pub did: Did,
    pub expiration: u64,
}

/// Claims recovered from a verified access token.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub user_did: String,
    pub name: String,
    pub app_did: String,
    pub app_instance_did: String,
}

pub struct AuthCore {
    identity: Option<ServerIdentity>,
    cache: DocCache,
    nonces: HashMap<String, AuthSecret>,
    challenge_ttl: u64,
    access_ttl: u64,
}

impl AuthCore {
    pub fn new(data_dir: &Path, challenge_ttl: u64, access_ttl: u64) -> Self {
        AuthCore {
            identity: None,
            cache: DocCache::new(data_dir),
            nonces: HashMap::new(),
            challenge_ttl,
            access_ttl,
        }
    }

    /// Install the server identity. Until this runs, every request is
    /// silently dropped by the dispatcher.
    pub fn activate(&mut self, identity: ServerIdentity) {
        self.cache
            .set_own(identity.did.clone(), identity.document.clone());
        self.identity = Some(identity);
    }

    pub fn is_ready(&self) -> bool {
        self.identity.is_some()
    }

    pub fn server_did(&self) -> Option<&Did> {
        self.identity.as_ref().map(|id| &id.did)
    }

    fn identity(&self) -> Result<&ServerIdentity, AuthError> {
        self.identity.as_ref().ok_or(AuthError::NotReady)
    }

    /// Step one: validate the client's DID document, persist it, and issue a
    /// challenge JWT whose nonce the presentation must answer.
    pub fn sign_in(&mut self, doc_json: &str) -> Result<String, AuthError> {
        let identity = self.identity()?;

        let doc = DidDocument::from_json(doc_json).map_err(|_| AuthError::BadDidDoc)?;
        let now = now_secs();
        doc.validate(now).map_err(|_| AuthError::DidDocInvalid)?;

        let client_did = doc.id.clone();
        vlogd!("auth: sign_in from {client_did}");

        self.cache
            .save(&client_did, &doc)
            .map_err(|_| AuthError::SaveDocFailed)?;

        let mut nonce_bytes = [0u8; NONCE_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        let expiration = now + self.challenge_ttl;
        let challenge = JwtBuilder::new()
            .expiration(expiration)
            .audience(client_did.as_str())
            .subject(CHALLENGE_SUBJECT)
            .issuer(identity.did.as_str())
            .claim("nonce", nonce.clone().into())
            .sign(&identity.keypair)
            .map_err(|_| AuthError::JwtSignFailed)?;

        self.nonces.insert(
            nonce,
            AuthSecret {
                did: client_did.clone(),
                expiration,
            },
        );
        vlogi!("auth: challenge issued to {client_did}");

        Ok(challenge)
    }

    /// Step two: verify the presentation against the outstanding challenge
    /// and issue an access token. The nonce is consumed whether or not the
    /// remaining checks pass.
    pub fn did_auth(&mut self, jwt: &str) -> Result<String, AuthError> {
        let now = now_secs();

        let jws = verify_jwt_with_resolver(jwt, &self.cache, now)
            .map_err(|_| AuthError::BadJwtChallenge)?;

        let vp_value = jws
            .claims
            .get("presentation")
            .cloned()
            .ok_or(AuthError::GetJwsClaimFailed)?;
        let vp: Presentation =
            serde_json::from_value(vp_value).map_err(|_| AuthError::GetPresentationFailed)?;

        vp.validate(&self.cache)
            .map_err(|_| AuthError::InvalidPresentation)?;

        let nonce = vp.proof.nonce.clone();
        if nonce.is_empty() {
            return Err(AuthError::PresentationEmptyNonce);
        }
        let secret = self
            .nonces
            .remove(&nonce)
            .ok_or(AuthError::PresentationBadNonce)?;

        let identity = self.identity()?;
        let realm = &vp.proof.realm;
        if realm.is_empty() {
            return Err(AuthError::PresentationEmptyRealm);
        }
        if realm != identity.did.as_str() {
            return Err(AuthError::PresentationBadRealm);
        }

        let vc = vp
            .credentials
            .first()
            .ok_or(AuthError::VerifiableCredentialBadCount)?;
        vc.validate(&self.cache, now).map_err(|e| match e {
            DidError::Expired => AuthError::CredentialExpiration,
            _ => AuthError::CredentialInvalid,
        })?;

        let instance_did = vc
            .subject_id()
            .ok_or(AuthError::CredentialSubjectIdNotExists)?;
        if instance_did != secret.did.as_str() {
            return Err(AuthError::CredentialSubjectBadInstanceId);
        }

        let app_did = vc
            .subject
            .get("appDid")
            .and_then(Value::as_str)
            .ok_or(AuthError::CredentialSubjectAppIdNotExists)?;

        if secret.expiration < now {
            return Err(AuthError::NonceExpired);
        }

        let user_did = vc.issuer.clone();
        let expiration = (now + self.access_ttl).min(vc.expiration_date);

        let mut builder = JwtBuilder::new()
            .expiration(expiration)
            .audience(instance_did)
            .subject(ACCESS_TOKEN_SUBJECT)
            .issuer(identity.did.as_str())
            .claim("userDid", user_did.as_str().into())
            .claim("appId", app_did.into())
            .claim("appInstanceDid", instance_did.into());
        if let Some(name) = vc.subject.get("name").and_then(Value::as_str) {
            builder = builder.claim("name", name.into());
        }

        let token = builder
            .sign(&identity.keypair)
            .map_err(|_| AuthError::JwtSignFailed)?;
        vlogi!("auth: access token issued to {user_did}");

        Ok(token)
    }

    /// Verify a bearer access token presented on an authenticated request.
    pub fn verify_access_token(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let identity = self.identity()?;
        let now = now_secs();

        let jwt = verify_jwt_with_key(token, &identity.keypair.verifying_key(), now).map_err(
            |e| match e {
                DidError::Expired => AuthError::AccessTokenExpired,
                _ => AuthError::BadAccessToken,
            },
        )?;

        if jwt.subject() != Some(ACCESS_TOKEN_SUBJECT) {
            return Err(AuthError::BadAccessToken);
        }

        let user_did = jwt
            .claim_str("userDid")
            .ok_or(AuthError::BadAccessToken)?
            .to_string();
        Ok(TokenInfo {
            user_did,
            name: jwt.claim_str("name").unwrap_or_default().to_string(),
            app_did: jwt.claim_str("appId").unwrap_or_default().to_string(),
            app_instance_did: jwt
                .claim_str("appInstanceDid")
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Number of outstanding challenges; used by tests and statistics.
    pub fn pending_challenges(&self) -> usize {
        self.nonces.len()
    }
}
