//! DID primitives: identifiers, ed25519 keypairs, self-signed documents,
//! compact EdDSA JWTs, and verifiable credentials/presentations.
//!
//! Identifiers are key-embedding: `did:vly:<base64url(public key)>`, so any
//! DID's verification key is derivable without network resolution. A
//! [`Resolver`] may still supply a richer cached document; [`DidDocument`]
//! carries an expiry and a self-signature over a canonical serialization of
//! the proof-less fields.
//!
//! All signatures sign the JSON serialization of a canonical mirror struct
//! with the proof removed, so verification never depends on hash-map
//! iteration order.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// DID method served by this node.
pub const DID_METHOD: &str = "vly";

/// Key reference used by every document this module produces.
pub const PRIMARY_KEY_ID: &str = "#primary";

const KEY_TYPE: &str = "Ed25519VerificationKey2020";

#[derive(Debug)]
pub enum DidError {
    BadDid(String),
    BadKeyMaterial(&'static str),
    BadSignature,
    Expired,
    Unresolved(String),
    BadJwt(&'static str),
    Json(serde_json::Error),
}

impl fmt::Display for DidError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DidError::BadDid(s) => write!(f, "malformed did: {s}"),
            DidError::BadKeyMaterial(what) => write!(f, "bad key material: {what}"),
            DidError::BadSignature => write!(f, "signature verification failed"),
            DidError::Expired => write!(f, "expired"),
            DidError::Unresolved(did) => write!(f, "cannot resolve {did}"),
            DidError::BadJwt(what) => write!(f, "malformed jwt: {what}"),
            DidError::Json(e) => write!(f, "json error: {e}"),
        }
    }
}

impl std::error::Error for DidError {}

impl From<serde_json::Error> for DidError {
    fn from(e: serde_json::Error) -> Self {
        DidError::Json(e)
    }
}

// ---------------------------------------------------------------------------
// Identifiers and keys
// ---------------------------------------------------------------------------

/// A decentralized identifier, `did:<method>:<method-specific-id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    pub fn parse(s: &str) -> Result<Self, DidError> {
        let mut parts = s.splitn(3, ':');
        let scheme = parts.next().unwrap_or_default();
        let method = parts.next().unwrap_or_default();
        let msid = parts.next().unwrap_or_default();
        if scheme != "did" || method.is_empty() || msid.is_empty() {
            return Err(DidError::BadDid(s.to_string()));
        }
        Ok(Did(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The portion after the method, used as the document cache file name.
    pub fn method_specific_id(&self) -> &str {
        self.0.rsplit(':').next().unwrap_or("")
    }

    /// Recover the verification key embedded in the method-specific id.
    pub fn embedded_key(&self) -> Result<VerifyingKey, DidError> {
        let raw = URL_SAFE_NO_PAD
            .decode(self.method_specific_id())
            .map_err(|_| DidError::BadKeyMaterial("method-specific id is not base64url"))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| DidError::BadKeyMaterial("embedded key is not 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| DidError::BadKeyMaterial("embedded key is not a curve point"))
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ed25519 keypair with hex-encoded storage form.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    pub fn generate() -> Self {
        Keypair {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_secret_hex(secret_hex: &str) -> Result<Self, DidError> {
        let raw = hex::decode(secret_hex)
            .map_err(|_| DidError::BadKeyMaterial("secret key is not hex"))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| DidError::BadKeyMaterial("secret key is not 32 bytes"))?;
        Ok(Keypair {
            signing: SigningKey::from_bytes(&bytes),
        })
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn public_hex(&self) -> String {
        hex::encode(self.signing.verifying_key().to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    /// The DID embedding this keypair's public key.
    pub fn did(&self) -> Did {
        let msid = URL_SAFE_NO_PAD.encode(self.signing.verifying_key().to_bytes());
        Did(format!("did:{DID_METHOD}:{msid}"))
    }

    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

fn verify_hex_signature(
    key: &VerifyingKey,
    message: &[u8],
    signature_hex: &str,
) -> Result<(), DidError> {
    let raw = hex::decode(signature_hex).map_err(|_| DidError::BadSignature)?;
    let bytes: [u8; 64] = raw.try_into().map_err(|_| DidError::BadSignature)?;
    let signature = Signature::from_bytes(&bytes);
    key.verify(message, &signature)
        .map_err(|_| DidError::BadSignature)
}

// ---------------------------------------------------------------------------
// DID documents
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicKeyEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    #[serde(rename = "publicKeyHex")]
    pub public_key_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proof {
    #[serde(rename = "verificationMethod")]
    pub verification_method: String,
    #[serde(rename = "signatureHex")]
    pub signature_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: Did,
    #[serde(rename = "publicKey")]
    pub public_key: Vec<PublicKeyEntry>,
    pub expires: u64,
    pub proof: Proof,
}

/// Signing payload for a document: every field except the proof.
#[derive(Serialize)]
struct CanonicalDocument<'a> {
    id: &'a Did,
    #[serde(rename = "publicKey")]
    public_key: &'a [PublicKeyEntry],
    expires: u64,
}

impl DidDocument {
    /// Build and self-sign a document for `keypair`.
    pub fn new_signed(keypair: &Keypair, expires: u64) -> Self {
        let id = keypair.did();
        let public_key = vec![PublicKeyEntry {
            id: PRIMARY_KEY_ID.to_string(),
            key_type: KEY_TYPE.to_string(),
            public_key_hex: keypair.public_hex(),
        }];
        let payload = serde_json::to_vec(&CanonicalDocument {
            id: &id,
            public_key: &public_key,
            expires,
        })
        .expect("document canonicalization is infallible");
        let signature_hex = keypair.sign_hex(&payload);
        DidDocument {
            id,
            public_key,
            expires,
            proof: Proof {
                verification_method: PRIMARY_KEY_ID.to_string(),
                signature_hex,
            },
        }
    }

    /// A minimal document derived from a key-embedding DID. Carries no
    /// self-signature; used only as a resolver fallback.
    pub fn derived(did: &Did) -> Result<Self, DidError> {
        let key = did.embedded_key()?;
        Ok(DidDocument {
            id: did.clone(),
            public_key: vec![PublicKeyEntry {
                id: PRIMARY_KEY_ID.to_string(),
                key_type: KEY_TYPE.to_string(),
                public_key_hex: hex::encode(key.to_bytes()),
            }],
            expires: u64::MAX,
            proof: Proof {
                verification_method: PRIMARY_KEY_ID.to_string(),
                signature_hex: String::new(),
            },
        })
    }

    pub fn from_json(json: &str) -> Result<Self, DidError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, DidError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Look up a verification key by reference (`#primary` or
    /// `<did>#primary`).
    pub fn key(&self, reference: &str) -> Result<VerifyingKey, DidError> {
        let fragment = reference.rsplit('#').next().unwrap_or(reference);
        let entry = self
            .public_key
            .iter()
            .find(|k| k.id.trim_start_matches('#') == fragment)
            .ok_or(DidError::BadKeyMaterial("unknown verification method"))?;
        let raw = hex::decode(&entry.public_key_hex)
            .map_err(|_| DidError::BadKeyMaterial("public key is not hex"))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| DidError::BadKeyMaterial("public key is not 32 bytes"))?;
        VerifyingKey::from_bytes(&bytes)
            .map_err(|_| DidError::BadKeyMaterial("public key is not a curve point"))
    }

    /// Check the self-signature and expiry.
    pub fn validate(&self, now: u64) -> Result<(), DidError> {
        if self.expires <= now {
            return Err(DidError::Expired);
        }
        let key = self.key(&self.proof.verification_method)?;
        let payload = serde_json::to_vec(&CanonicalDocument {
            id: &self.id,
            public_key: &self.public_key,
            expires: self.expires,
        })?;
        verify_hex_signature(&key, &payload, &self.proof.signature_hex)
    }
}

/// Resolves DID documents without touching the network.
pub trait Resolver {
    fn resolve(&self, did: &Did) -> Option<DidDocument>;
}

/// Resolve a verification key: resolver document first, embedded key as the
/// fallback for bare key-embedding DIDs.
pub fn resolve_key(
    resolver: &dyn Resolver,
    did: &Did,
    reference: &str,
) -> Result<VerifyingKey, DidError> {
    if let Some(doc) = resolver.resolve(did) {
        return doc.key(reference);
    }
    did.embedded_key()
        .map_err(|_| DidError::Unresolved(did.as_str().to_string()))
}

// ---------------------------------------------------------------------------
// Compact JWTs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtHeader {
    pub typ: String,
    pub version: String,
    pub alg: String,
}

impl Default for JwtHeader {
    fn default() -> Self {
        JwtHeader {
            typ: "JWT".to_string(),
            version: "1.0".to_string(),
            alg: "EdDSA".to_string(),
        }
    }
}

/// A parsed and signature-checked JWT.
#[derive(Debug, Clone)]
pub struct Jwt {
    pub header: JwtHeader,
    pub claims: Map<String, Value>,
}

impl Jwt {
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    pub fn claim_u64(&self, name: &str) -> Option<u64> {
        self.claims.get(name).and_then(Value::as_u64)
    }

    pub fn expiration(&self) -> Option<u64> {
        self.claim_u64("exp")
    }

    pub fn audience(&self) -> Option<&str> {
        self.claim_str("aud")
    }

    pub fn subject(&self) -> Option<&str> {
        self.claim_str("sub")
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claim_str("iss")
    }
}

/// Assembles and signs compact JWTs: `b64(header).b64(claims).b64(sig)`,
/// EdDSA over the first two segments.
pub struct JwtBuilder {
    header: JwtHeader,
    claims: Map<String, Value>,
}

impl JwtBuilder {
    pub fn new() -> Self {
        JwtBuilder {
            header: JwtHeader::default(),
            claims: Map::new(),
        }
    }

    pub fn expiration(mut self, exp: u64) -> Self {
        self.claims.insert("exp".to_string(), exp.into());
        self
    }

    pub fn audience(mut self, aud: &str) -> Self {
        self.claims.insert("aud".to_string(), aud.into());
        self
    }

    pub fn subject(mut self, sub: &str) -> Self {
        self.claims.insert("sub".to_string(), sub.into());
        self
    }

    pub fn issuer(mut self, iss: &str) -> Self {
        self.claims.insert("iss".to_string(), iss.into());
        self
    }

    pub fn claim(mut self, name: &str, value: Value) -> Self {
        self.claims.insert(name.to_string(), value);
        self
    }

    pub fn sign(self, keypair: &Keypair) -> Result<String, DidError> {
        let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.header)?);
        let claims = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&self.claims)?);
        let signing_input = format!("{header}.{claims}");
        let signature =
            URL_SAFE_NO_PAD.encode(keypair.signing.sign(signing_input.as_bytes()).to_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }
}

impl Default for JwtBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn split_compact(compact: &str) -> Result<(&str, &str, &str), DidError> {
    let mut parts = compact.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(c), Some(s), None) => Ok((h, c, s)),
        _ => Err(DidError::BadJwt("expected three segments")),
    }
}

fn decode_segments(compact: &str) -> Result<(JwtHeader, Map<String, Value>, Vec<u8>), DidError> {
    let (h, c, s) = split_compact(compact)?;
    let header: JwtHeader = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(h)
            .map_err(|_| DidError::BadJwt("header is not base64url"))?,
    )?;
    let claims: Map<String, Value> = serde_json::from_slice(
        &URL_SAFE_NO_PAD
            .decode(c)
            .map_err(|_| DidError::BadJwt("claims are not base64url"))?,
    )?;
    let signature = URL_SAFE_NO_PAD
        .decode(s)
        .map_err(|_| DidError::BadJwt("signature is not base64url"))?;
    Ok((header, claims, signature))
}

fn check_signature(compact: &str, signature: &[u8], key: &VerifyingKey) -> Result<(), DidError> {
    let (h, c, _) = split_compact(compact)?;
    let signing_input = format!("{h}.{c}");
    let bytes: [u8; 64] = signature
        .to_vec()
        .try_into()
        .map_err(|_| DidError::BadSignature)?;
    key.verify(signing_input.as_bytes(), &Signature::from_bytes(&bytes))
        .map_err(|_| DidError::BadSignature)
}

/// Verify a compact JWT against an explicit key, enforcing `exp`.
pub fn verify_jwt_with_key(compact: &str, key: &VerifyingKey, now: u64) -> Result<Jwt, DidError> {
    let (header, claims, signature) = decode_segments(compact)?;
    check_signature(compact, &signature, key)?;
    let jwt = Jwt { header, claims };
    match jwt.expiration() {
        Some(exp) if exp > now => Ok(jwt),
        Some(_) => Err(DidError::Expired),
        None => Err(DidError::BadJwt("missing exp claim")),
    }
}

/// Verify a compact JWT whose signer is named by its `iss` claim, resolving
/// the key through `resolver`.
pub fn verify_jwt_with_resolver(
    compact: &str,
    resolver: &dyn Resolver,
    now: u64,
) -> Result<Jwt, DidError> {
    let (header, claims, signature) = decode_segments(compact)?;
    let jwt = Jwt { header, claims };
    let issuer = jwt.issuer().ok_or(DidError::BadJwt("missing iss claim"))?;
    let issuer = Did::parse(issuer)?;
    let key = resolve_key(resolver, &issuer, PRIMARY_KEY_ID)?;
    check_signature(compact, &signature, &key)?;
    match jwt.expiration() {
        Some(exp) if exp > now => Ok(jwt),
        Some(_) => Err(DidError::Expired),
        None => Err(DidError::BadJwt("missing exp claim")),
    }
}

// ---------------------------------------------------------------------------
// Verifiable credentials and presentations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub issuer: Did,
    #[serde(rename = "issuanceDate")]
    pub issuance_date: u64,
    #[serde(rename = "expirationDate")]
    pub expiration_date: u64,
    #[serde(rename = "credentialSubject")]
    pub subject: Map<String, Value>,
    pub proof: Proof,
}

#[derive(Serialize)]
struct CanonicalCredential<'a> {
    id: &'a str,
    issuer: &'a Did,
    #[serde(rename = "issuanceDate")]
    issuance_date: u64,
    #[serde(rename = "expirationDate")]
    expiration_date: u64,
    #[serde(rename = "credentialSubject")]
    subject: &'a Map<String, Value>,
}

impl Credential {
    /// Issue a credential over `subject`, signed by `issuer`.
    pub fn issue(
        issuer: &Keypair,
        id: &str,
        subject: Map<String, Value>,
        issuance_date: u64,
        expiration_date: u64,
    ) -> Result<Self, DidError> {
        let issuer_did = issuer.did();
        let payload = serde_json::to_vec(&CanonicalCredential {
            id,
            issuer: &issuer_did,
            issuance_date,
            expiration_date,
            subject: &subject,
        })?;
        let signature_hex = issuer.sign_hex(&payload);
        Ok(Credential {
            id: id.to_string(),
            issuer: issuer_did.clone(),
            issuance_date,
            expiration_date,
            subject,
            proof: Proof {
                verification_method: format!("{issuer_did}{PRIMARY_KEY_ID}"),
                signature_hex,
            },
        })
    }

    pub fn subject_id(&self) -> Option<&str> {
        self.subject.get("id").and_then(Value::as_str)
    }

    /// Verify the issuer signature and expiry.
    pub fn validate(&self, resolver: &dyn Resolver, now: u64) -> Result<(), DidError> {
        if self.expiration_date <= now {
            return Err(DidError::Expired);
        }
        let key = resolve_key(resolver, &self.issuer, &self.proof.verification_method)?;
        let payload = serde_json::to_vec(&CanonicalCredential {
            id: &self.id,
            issuer: &self.issuer,
            issuance_date: self.issuance_date,
            expiration_date: self.expiration_date,
            subject: &self.subject,
        })?;
        verify_hex_signature(&key, &payload, &self.proof.signature_hex)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresentationProof {
    #[serde(rename = "verificationMethod")]
    pub verification_method: String,
    pub realm: String,
    pub nonce: String,
    #[serde(rename = "signatureHex")]
    pub signature_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(rename = "type")]
    pub presentation_type: String,
    #[serde(rename = "verifiableCredential")]
    pub credentials: Vec<Credential>,
    pub proof: PresentationProof,
}

#[derive(Serialize)]
struct CanonicalPresentation<'a> {
    #[serde(rename = "type")]
    presentation_type: &'a str,
    #[serde(rename = "verifiableCredential")]
    credentials: &'a [Credential],
    realm: &'a str,
    nonce: &'a str,
}

const PRESENTATION_TYPE: &str = "VerifiablePresentation";

impl Presentation {
    /// Bundle credentials into a presentation bound to `realm`/`nonce`,
    /// signed by the holder.
    pub fn create(
        holder: &Keypair,
        credentials: Vec<Credential>,
        realm: &str,
        nonce: &str,
    ) -> Result<Self, DidError> {
        let payload = serde_json::to_vec(&CanonicalPresentation {
            presentation_type: PRESENTATION_TYPE,
            credentials: &credentials,
            realm,
            nonce,
        })?;
        let signature_hex = holder.sign_hex(&payload);
        Ok(Presentation {
            presentation_type: PRESENTATION_TYPE.to_string(),
            credentials,
            proof: PresentationProof {
                verification_method: format!("{}{PRIMARY_KEY_ID}", holder.did()),
                realm: realm.to_string(),
                nonce: nonce.to_string(),
                signature_hex,
            },
        })
    }

    /// The DID that signed this presentation.
    pub fn holder(&self) -> Result<Did, DidError> {
        let did_part = self
            .proof
            .verification_method
            .split('#')
            .next()
            .unwrap_or_default();
        Did::parse(did_part)
    }

    /// Verify the holder signature over credentials, realm, and nonce.
    pub fn validate(&self, resolver: &dyn Resolver) -> Result<(), DidError> {
        let holder = self.holder()?;
        let key = resolve_key(resolver, &holder, &self.proof.verification_method)?;
        let payload = serde_json::to_vec(&CanonicalPresentation {
            presentation_type: &self.presentation_type,
            credentials: &self.credentials,
            realm: &self.proof.realm,
            nonce: &self.proof.nonce,
        })?;
        verify_hex_signature(&key, &payload, &self.proof.signature_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoDocs;

    impl Resolver for NoDocs {
        fn resolve(&self, _did: &Did) -> Option<DidDocument> {
            None
        }
    }

    #[test]
    fn did_embeds_recoverable_key() {
        let keypair = Keypair::generate();
        let did = keypair.did();
        let key = did.embedded_key().unwrap();
        assert_eq!(key, keypair.verifying_key());
        assert!(Did::parse(did.as_str()).is_ok());
        assert!(Did::parse("did:vly").is_err());
        assert!(Did::parse("urn:vly:abc").is_err());
    }

    #[test]
    fn document_self_signature_roundtrips() {
        let keypair = Keypair::generate();
        let doc = DidDocument::new_signed(&keypair, 4_000_000_000);
        doc.validate(1_700_000_000).unwrap();

        let json = doc.to_json().unwrap();
        let parsed = DidDocument::from_json(&json).unwrap();
        parsed.validate(1_700_000_000).unwrap();

        let mut tampered = parsed.clone();
        tampered.expires += 1;
        assert!(matches!(
            tampered.validate(1_700_000_000),
            Err(DidError::BadSignature)
        ));
    }

    #[test]
    fn expired_document_is_rejected() {
        let keypair = Keypair::generate();
        let doc = DidDocument::new_signed(&keypair, 100);
        assert!(matches!(doc.validate(100), Err(DidError::Expired)));
    }

    #[test]
    fn jwt_roundtrip_and_expiry() {
        let keypair = Keypair::generate();
        let compact = JwtBuilder::new()
            .expiration(2_000)
            .audience("did:vly:abc")
            .subject("AccessToken")
            .claim("userDid", "did:vly:xyz".into())
            .sign(&keypair)
            .unwrap();

        let jwt = verify_jwt_with_key(&compact, &keypair.verifying_key(), 1_000).unwrap();
        assert_eq!(jwt.subject(), Some("AccessToken"));
        assert_eq!(jwt.claim_str("userDid"), Some("did:vly:xyz"));

        assert!(matches!(
            verify_jwt_with_key(&compact, &keypair.verifying_key(), 2_000),
            Err(DidError::Expired)
        ));

        let other = Keypair::generate();
        assert!(matches!(
            verify_jwt_with_key(&compact, &other.verifying_key(), 1_000),
            Err(DidError::BadSignature)
        ));
    }

    #[test]
    fn jwt_resolver_path_uses_issuer_claim() {
        let keypair = Keypair::generate();
        let compact = JwtBuilder::new()
            .expiration(2_000)
            .issuer(keypair.did().as_str())
            .sign(&keypair)
            .unwrap();
        let jwt = verify_jwt_with_resolver(&compact, &NoDocs, 1_000).unwrap();
        assert_eq!(jwt.issuer(), Some(keypair.did().as_str()));
    }

    #[test]
    fn credential_validates_against_embedded_issuer_key() {
        let issuer = Keypair::generate();
        let holder = Keypair::generate();
        let mut subject = Map::new();
        subject.insert("id".to_string(), holder.did().as_str().into());
        subject.insert("appDid".to_string(), "did:vly:app".into());

        let vc = Credential::issue(&issuer, "vc-1", subject, 1_000, 3_000).unwrap();
        vc.validate(&NoDocs, 2_000).unwrap();
        assert_eq!(vc.subject_id(), Some(holder.did().as_str()));
        assert!(matches!(vc.validate(&NoDocs, 3_000), Err(DidError::Expired)));

        let mut forged = vc.clone();
        forged
            .subject
            .insert("appDid".to_string(), "did:vly:evil".into());
        assert!(matches!(
            forged.validate(&NoDocs, 2_000),
            Err(DidError::BadSignature)
        ));
    }

    #[test]
    fn presentation_binds_nonce_and_realm() {
        let issuer = Keypair::generate();
        let holder = Keypair::generate();
        let mut subject = Map::new();
        subject.insert("id".to_string(), holder.did().as_str().into());
        let vc = Credential::issue(&issuer, "vc-1", subject, 1_000, 3_000).unwrap();

        let vp = Presentation::create(&holder, vec![vc], "did:vly:server", "abc123").unwrap();
        vp.validate(&NoDocs).unwrap();
        assert_eq!(vp.holder().unwrap(), holder.did());

        let mut replayed = vp.clone();
        replayed.proof.nonce = "other".to_string();
        assert!(matches!(
            replayed.validate(&NoDocs),
            Err(DidError::BadSignature)
        ));
    }
}
