mod common;

use std::time::Duration;

use volary::auth::AuthError;
use volary::config::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_CHALLENGE_TTL_SECS};

use common::{acquire_token, jwt_claims, now_secs, ready_auth, temp_dir, TestClient};

#[test]
fn sign_in_then_did_auth_issues_a_bounded_token() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();

    let before = now_secs();
    let token = acquire_token(&mut auth, &client, "alice");

    let info = auth.verify_access_token(&token).unwrap();
    assert_eq!(info.user_did, client.user_did());
    assert_eq!(info.name, "alice");
    assert_eq!(info.app_did, "did:vly:feeds-app");
    assert_eq!(info.app_instance_did, client.app.did().as_str());

    let claims = jwt_claims(&token);
    assert_eq!(claims["sub"], "AccessToken");
    assert_eq!(claims["aud"], client.app.did().as_str());
    let exp = claims["exp"].as_u64().unwrap();
    assert!(exp <= now_secs() + DEFAULT_ACCESS_TTL_SECS);
    assert!(exp > before);
}

#[test]
fn challenge_jwt_names_the_client_and_carries_a_nonce() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();

    let challenge = auth.sign_in(&client.doc_json()).unwrap();
    let claims = jwt_claims(&challenge);
    assert_eq!(claims["sub"], "DIDAuthChallenge");
    assert_eq!(claims["aud"], client.app.did().as_str());
    let nonce = claims["nonce"].as_str().unwrap();
    assert_eq!(nonce.len(), 64);
    assert_eq!(auth.pending_challenges(), 1);
}

#[test]
fn nonce_is_consumed_on_first_use() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();

    let challenge = auth.sign_in(&client.doc_json()).unwrap();
    let realm = auth.server_did().unwrap().as_str().to_string();
    let answer = client.answer_challenge(&challenge, &realm);

    auth.did_auth(&answer).unwrap();
    assert_eq!(auth.pending_challenges(), 0);

    // replaying the same presentation must fail: the nonce is gone
    let err = auth.did_auth(&answer).unwrap_err();
    assert!(matches!(err, AuthError::PresentationBadNonce));
}

#[test]
fn wrong_realm_is_rejected() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();

    let challenge = auth.sign_in(&client.doc_json()).unwrap();
    let answer = client.answer_challenge(&challenge, "did:vly:some-other-node");
    let err = auth.did_auth(&answer).unwrap_err();
    assert!(matches!(err, AuthError::PresentationBadRealm));
}

#[test]
fn presentation_from_a_different_holder_is_rejected() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let signed_in = TestClient::new();
    let impostor = TestClient::new();

    let challenge = auth.sign_in(&signed_in.doc_json()).unwrap();
    let realm = auth.server_did().unwrap().as_str().to_string();
    // impostor answers the nonce with its own credential chain
    let answer = impostor.answer_challenge(&challenge, &realm);
    let err = auth.did_auth(&answer).unwrap_err();
    assert!(matches!(err, AuthError::CredentialSubjectBadInstanceId));
}

#[test]
fn expired_challenge_is_rejected() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, 0, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();

    let challenge = auth.sign_in(&client.doc_json()).unwrap();
    let realm = auth.server_did().unwrap().as_str().to_string();
    std::thread::sleep(Duration::from_millis(1100));
    let answer = client.answer_challenge(&challenge, &realm);
    let err = auth.did_auth(&answer).unwrap_err();
    assert!(matches!(err, AuthError::NonceExpired));
}

#[test]
fn malformed_and_tampered_documents_fail_sign_in() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);

    let err = auth.sign_in("not json at all").unwrap_err();
    assert!(matches!(err, AuthError::BadDidDoc));

    let client = TestClient::new();
    let tampered = client.doc_json().replace("\"expires\":", "\"expires\": 9");
    let err = auth.sign_in(&tampered).unwrap_err();
    assert!(matches!(err, AuthError::DidDocInvalid));
}

#[test]
fn garbage_presentation_jwt_is_a_bad_challenge() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let err = auth.did_auth("definitely.not.jwt").unwrap_err();
    assert!(matches!(err, AuthError::BadJwtChallenge));
}

#[test]
fn challenge_jwt_is_not_an_access_token() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();

    // signed by the right key, but sub is DIDAuthChallenge
    let challenge = auth.sign_in(&client.doc_json()).unwrap();
    let err = auth.verify_access_token(&challenge).unwrap_err();
    assert!(matches!(err, AuthError::BadAccessToken));

    let err = auth.verify_access_token("junk").unwrap_err();
    assert!(matches!(err, AuthError::BadAccessToken));
}

#[test]
fn token_expiry_is_capped_by_the_credential() {
    let dir = temp_dir("auth");
    // node-side ttl far beyond the credential's one hour
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, 10 * 365 * 24 * 3600);
    let client = TestClient::new();

    let token = acquire_token(&mut auth, &client, "");
    let exp = jwt_claims(&token)["exp"].as_u64().unwrap();
    assert!(exp <= now_secs() + 3600 + 5);
}

#[test]
fn signed_in_document_lands_in_the_local_cache() {
    let dir = temp_dir("auth");
    let mut auth = ready_auth(&dir, DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_ACCESS_TTL_SECS);
    let client = TestClient::new();
    auth.sign_in(&client.doc_json()).unwrap();

    let cached = dir
        .join("localdoc")
        .join(client.app.did().method_specific_id());
    assert!(cached.exists(), "document not persisted at {cached:?}");
}
