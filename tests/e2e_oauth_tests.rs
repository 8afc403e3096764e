//! End-to-end tests for the OAuth provider surface.
//!
//! The chat-side approval is simulated through the store (claim + approve),
//! which is exactly what the dispatcher does; everything else goes over HTTP
//! against the real router.

mod common;

use common::{http_client, TestServer, TEST_CLIENT_ID, TEST_CLIENT_SECRET, TEST_REDIRECT_URI};
use ponte_server::store::{BindingStore, PendingAuth, PendingStore, TokenStore};

/// Starts an authorization through `/authorize` and returns the pending row.
async fn start_authorization(server: &TestServer, scope: &str, state: Option<&str>) -> PendingAuth {
    let client = http_client();
    let mut url = format!(
        "{}/authorize?client_id={}&redirect_uri={}&response_type=code&scope={}",
        server.base_url,
        TEST_CLIENT_ID,
        urlencoding::encode(TEST_REDIRECT_URI),
        urlencoding::encode(scope),
    );
    if let Some(state) = state {
        url.push_str(&format!("&state={}", state));
    }

    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();

    // The verification code is printed on the page; recover the row from it.
    let code = extract_verification_code(&body);
    server
        .store
        .get_pending_auth_by_verification_code(&code, true)
        .unwrap()
        .expect("pending auth row should be durable before the page renders")
}

fn extract_verification_code(html: &str) -> String {
    let marker = r#"<div class="code-value">"#;
    let start = html.find(marker).expect("code missing from page") + marker.len();
    let end = html[start..].find('<').unwrap() + start;
    html[start..end].trim().to_string()
}

/// Chat-side approval as performed by the auth command.
fn approve(server: &TestServer, pending: &PendingAuth, uin: i64, bind_user_id: i64) {
    assert!(server
        .store
        .claim_pending_auth(pending.id, uin, bind_user_id)
        .unwrap());
    assert!(server.store.approve_pending_auth(pending.id).unwrap());
}

#[tokio::test]
async fn test_full_authorization_code_flow() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    let pending = start_authorization(&server, "openid email uin", Some("ST")).await;
    approve(&server, &pending, 10001, user.id);

    // Browser poll sees the approval and the relying-party redirect.
    let response = client
        .get(format!(
            "{}/authorize/check?verification_code={}",
            server.base_url,
            pending.verification_code.to_lowercase()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["approved"], true);
    let redirect_uri = body["redirect_uri"].as_str().unwrap();
    assert!(redirect_uri.starts_with(TEST_REDIRECT_URI));
    assert!(redirect_uri.contains("state=ST"));
    assert!(redirect_uri.contains(&format!("code={}", urlencoding::encode(&pending.auth_code))));

    // Exchange with HTTP basic client authentication.
    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
            ("redirect_uri", TEST_REDIRECT_URI),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let tokens: serde_json::Value = response.json().await.unwrap();
    assert_eq!(tokens["token_type"], "Bearer");
    let access_token = tokens["access_token"].as_str().unwrap();
    assert!(tokens["refresh_token"].is_string());
    assert!(tokens["id_token"].is_string());

    // The access token authenticates userinfo; claims follow the scope.
    let response = client
        .get(format!("{}/userinfo", server.base_url))
        .bearer_auth(access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let claims: serde_json::Value = response.json().await.unwrap();
    assert_eq!(claims["uin"], 10001);
    assert_eq!(claims["sub"], "u-42");
    assert_eq!(claims["email"], "a@x");
    assert!(claims.get("preferred_username").is_none());
}

#[tokio::test]
async fn test_auth_code_replay_is_rejected() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    let pending = start_authorization(&server, "openid", None).await;
    approve(&server, &pending, 10001, user.id);

    let exchange = |code: String| {
        let client = client.clone();
        let url = format!("{}/token", server.base_url);
        async move {
            client
                .post(url)
                .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
                .form(&[
                    ("grant_type", "authorization_code".to_string()),
                    ("code", code),
                ])
                .send()
                .await
                .unwrap()
        }
    };

    let first = exchange(pending.auth_code.clone()).await;
    assert_eq!(first.status(), 200);

    let second = exchange(pending.auth_code.clone()).await;
    assert_eq!(second.status(), 400);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_refresh_token_rotation() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    let pending = start_authorization(&server, "openid", None).await;
    approve(&server, &pending, 10001, user.id);

    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
        ])
        .send()
        .await
        .unwrap();
    let first: serde_json::Value = response.json().await.unwrap();
    let access_1 = first["access_token"].as_str().unwrap().to_string();
    let refresh_1 = first["refresh_token"].as_str().unwrap().to_string();

    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_1.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let second: serde_json::Value = response.json().await.unwrap();
    let access_2 = second["access_token"].as_str().unwrap();
    let refresh_2 = second["refresh_token"].as_str().unwrap();
    assert_ne!(access_2, access_1);
    assert_ne!(refresh_2, refresh_1);

    // The rotated-out refresh token is dead.
    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_1.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_grant");
}

#[tokio::test]
async fn test_pkce_s256_flow() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    // RFC 7636 appendix B pair.
    let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    let challenge = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    let url = format!(
        "{}/authorize?client_id={}&redirect_uri={}&response_type=code&scope=openid&code_challenge={}&code_challenge_method=S256",
        server.base_url,
        TEST_CLIENT_ID,
        urlencoding::encode(TEST_REDIRECT_URI),
        challenge,
    );
    let response = client.get(&url).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let code = extract_verification_code(&response.text().await.unwrap());
    let pending = server
        .store
        .get_pending_auth_by_verification_code(&code, true)
        .unwrap()
        .unwrap();
    approve(&server, &pending, 10001, user.id);

    // Missing verifier is rejected before any state is consumed.
    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");

    // Wrong verifier fails the challenge.
    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
            ("code_verifier", "wrong-verifier-wrong-verifier-wrong-verify"),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Correct verifier succeeds.
    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
            ("code_verifier", verifier),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_revoke_is_idempotent_and_kills_userinfo() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    let pending = start_authorization(&server, "openid", None).await;
    approve(&server, &pending, 10001, user.id);

    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
        ])
        .send()
        .await
        .unwrap();
    let tokens: serde_json::Value = response.json().await.unwrap();
    let access_token = tokens["access_token"].as_str().unwrap().to_string();

    for _ in 0..2 {
        let response = client
            .post(format!("{}/revoke", server.base_url))
            .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
            .form(&[("token", access_token.as_str())])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    // Revoking a token that never existed still answers 200.
    let response = client
        .post(format!("{}/revoke", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[("token", "no-such-token")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client
        .get(format!("{}/userinfo", server.base_url))
        .bearer_auth(&access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_token_rejects_bad_client_secret() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some("wrong-secret"))
        .form(&[("grant_type", "authorization_code"), ("code", "whatever")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn test_token_rejects_unknown_grant_type() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[("grant_type", "password")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_authorize_rejects_unsafe_redirect_uri() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri=javascript:alert(1)&response_type=code&scope=openid",
            server.base_url, TEST_CLIENT_ID,
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_redirect_uri() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=code&scope=openid",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode("https://evil.example.com/cb"),
        ))
        .send()
        .await
        .unwrap();
    // Unregistered targets never receive a redirect.
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_authorize_never_redirects_to_unregistered_uri() {
    let server = TestServer::spawn().await;
    let client = http_client();

    // A safe-looking but unregistered target combined with a failing
    // response_type must not produce an error redirect.
    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=token&scope=openid&state=XYZ",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode("https://evil.example.com/cb"),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(!response.headers().contains_key("location"));

    // Same for an unknown client with a registered-looking URI.
    let response = client
        .get(format!(
            "{}/authorize?client_id=nobody&redirect_uri={}&response_type=code&scope=openid",
            server.base_url,
            urlencoding::encode(TEST_REDIRECT_URI),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert!(!response.headers().contains_key("location"));
}

#[tokio::test]
async fn test_redirects_append_to_existing_query() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    // Registration matching ignores the query, so a query-bearing variant of
    // the registered URI is accepted; delivered parameters must extend it.
    let redirect_uri = format!("{}?foo=bar", TEST_REDIRECT_URI);

    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=code&scope=openid&state=ST",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode(&redirect_uri),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let code = extract_verification_code(&response.text().await.unwrap());
    let pending = server
        .store
        .get_pending_auth_by_verification_code(&code, true)
        .unwrap()
        .unwrap();
    approve(&server, &pending, 10001, user.id);

    let response = client
        .get(format!(
            "{}/authorize/check?verification_code={}",
            server.base_url, pending.verification_code
        ))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    let delivered = body["redirect_uri"].as_str().unwrap();
    assert!(delivered.starts_with(&format!("{}?foo=bar&code=", TEST_REDIRECT_URI)));
    assert_eq!(delivered.matches('?').count(), 1);

    // Error redirects extend the query the same way.
    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=code&scope=admin",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode(&redirect_uri),
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with(&format!("{}?foo=bar&error=invalid_scope", TEST_REDIRECT_URI)));
}

#[tokio::test]
async fn test_authorize_redirects_disallowed_scope() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=code&scope=admin&state=XYZ",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode(TEST_REDIRECT_URI),
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.starts_with(TEST_REDIRECT_URI));
    assert!(location.contains("error=invalid_scope"));
    assert!(location.contains("state=XYZ"));
}

#[tokio::test]
async fn test_authorize_redirects_unsupported_response_type() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/authorize?client_id={}&redirect_uri={}&response_type=token&scope=openid",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode(TEST_REDIRECT_URI),
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_redirection());
    let location = response.headers()["location"].to_str().unwrap();
    assert!(location.contains("error=unsupported_response_type"));
}

#[tokio::test]
async fn test_authorize_check_unknown_and_expired() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/authorize/check?verification_code=NOPE42",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // An unapproved, unexpired request is pending.
    let pending = start_authorization(&server, "openid", None).await;
    let response = client
        .get(format!(
            "{}/authorize/check?verification_code={}",
            server.base_url, pending.verification_code
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["approved"], false);
    assert_eq!(body["pending"], true);
}

#[tokio::test]
async fn test_authorize_pending_json_variant() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/authorize/pending?client_id={}&redirect_uri={}&scope=openid",
            server.base_url,
            TEST_CLIENT_ID,
            urlencoding::encode(TEST_REDIRECT_URI),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let code = body["verification_code"].as_str().unwrap();
    assert_eq!(code.len(), server.config.provider.verification_code_length);
    assert!(body["expires_in"].is_i64());

    assert!(server
        .store
        .get_pending_auth_by_verification_code(code, true)
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_openid_configuration_document() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/.well-known/openid-configuration",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["issuer"], "http://localhost:8000");
    assert_eq!(
        body["authorization_endpoint"],
        "http://localhost:8000/authorize"
    );
    assert_eq!(body["token_endpoint"], "http://localhost:8000/token");
    assert_eq!(
        body["id_token_signing_alg_values_supported"],
        serde_json::json!(["HS256"])
    );
}

#[tokio::test]
async fn test_health_and_security_headers() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!("{}/health", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_userinfo_requires_bearer() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!("{}/userinfo", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    assert!(response.headers().contains_key("www-authenticate"));
}

#[tokio::test]
async fn test_callback_with_unknown_state_is_rejected() {
    let server = TestServer::spawn().await;
    let client = http_client();

    let response = client
        .get(format!(
            "{}/callback?code=XYZ&state=never-issued",
            server.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_unbind_does_not_cascade_revoke_tokens() {
    let server = TestServer::spawn().await;
    let user = server.bind_user(10001, "u-42");
    let client = http_client();

    let pending = start_authorization(&server, "openid uin", None).await;
    approve(&server, &pending, 10001, user.id);

    let response = client
        .post(format!("{}/token", server.base_url))
        .basic_auth(TEST_CLIENT_ID, Some(TEST_CLIENT_SECRET))
        .form(&[
            ("grant_type", "authorization_code"),
            ("code", pending.auth_code.as_str()),
        ])
        .send()
        .await
        .unwrap();
    let tokens: serde_json::Value = response.json().await.unwrap();
    let access_token = tokens["access_token"].as_str().unwrap().to_string();

    // Unbind (as the confirm command would) without revoking tokens.
    assert!(server.store.deactivate_bind_user(user.id).unwrap());

    // The token row itself is untouched: it lives out its TTL un-revoked.
    let record = server
        .store
        .get_token_by_access_token(&access_token, true)
        .unwrap()
        .unwrap();
    assert!(!record.is_revoked);

    // Claim resolution stops anyway, because userinfo needs the active
    // binding.
    let response = client
        .get(format!("{}/userinfo", server.base_url))
        .bearer_auth(&access_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
}
