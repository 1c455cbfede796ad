//! End-to-end gateway behavior against a local scripted HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use serde_json::json;
use tiny_http::{Response, Server};

use springram::api::{Client, ClientConfig, Error, Session};
use springram::session;
use springram::storage;

fn session_store(dir: &tempfile::TempDir) -> Arc<session::Store> {
    let storage = Arc::new(
        storage::Store::open(storage::Options {
            path: Some(dir.path().join("state.db")),
        })
        .expect("open storage"),
    );
    Arc::new(session::Store::open(storage))
}

fn stale_session(refresh_token: &str) -> Session {
    Session {
        access_token: "stale".into(),
        refresh_token: refresh_token.into(),
        token_type: "Bearer".into(),
        access_token_expires_at: 0,
        refresh_token_expires_at: 0,
    }
}

fn authorization(request: &tiny_http::Request) -> String {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string())
        .unwrap_or_default()
}

fn client_for(port: u16, sessions: Arc<session::Store>) -> Client {
    Client::new(
        sessions,
        ClientConfig {
            base_url: Some(format!("http://127.0.0.1:{port}")),
            ..ClientConfig::default()
        },
    )
    .expect("build client")
}

#[test]
fn expired_token_is_refreshed_exactly_once_and_the_call_retried() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = session_store(&dir);
    sessions.set(Some(stale_session("refresh-1")));

    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    let refresh_calls = Arc::new(AtomicUsize::new(0));

    let counter = refresh_calls.clone();
    let script = thread::spawn(move || {
        for _ in 0..3 {
            let request = server.recv().unwrap();
            let path = request.url().to_string();
            let auth = authorization(&request);
            if path == "/api/v1/auth/refresh" {
                counter.fetch_add(1, Ordering::SeqCst);
                let body = json!({
                    "accessToken": "fresh",
                    "refreshToken": "refresh-2",
                    "tokenType": "Bearer",
                    "accessTokenExpiresAt": 0,
                    "refreshTokenExpiresAt": 0
                })
                .to_string();
                request.respond(Response::from_string(body)).unwrap();
            } else if auth == "Bearer stale" {
                request
                    .respond(Response::from_string("{}").with_status_code(401))
                    .unwrap();
            } else {
                assert_eq!(auth, "Bearer fresh", "retry must carry the renewed token");
                let body = json!({
                    "id": "u1",
                    "email": "ana@example.com",
                    "role": "USER",
                    "preferredLanguage": "es"
                })
                .to_string();
                request.respond(Response::from_string(body)).unwrap();
            }
        }
    });

    let client = client_for(port, sessions.clone());
    let user = client.me().expect("call succeeds after refresh");
    assert_eq!(user.id, "u1");
    assert_eq!(refresh_calls.load(Ordering::SeqCst), 1);

    // The renewed pair replaced the persisted one.
    let renewed = sessions.get().unwrap();
    assert_eq!(renewed.access_token, "fresh");
    assert_eq!(renewed.refresh_token, "refresh-2");

    script.join().unwrap();
}

#[test]
fn rejected_refresh_tears_the_session_down() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = session_store(&dir);
    sessions.set(Some(stale_session("refresh-1")));

    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();

    let script = thread::spawn(move || {
        for _ in 0..2 {
            let request = server.recv().unwrap();
            request
                .respond(Response::from_string("{}").with_status_code(401))
                .unwrap();
        }
    });

    let client = client_for(port, sessions.clone());
    let err = client.me().expect_err("refresh rejection is terminal");
    assert!(matches!(err, Error::Unauthorized), "got: {err}");
    assert!(sessions.get().is_none(), "session must be erased");

    script.join().unwrap();
}

#[test]
fn missing_refresh_token_surfaces_the_401_without_a_refresh_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let sessions = session_store(&dir);
    sessions.set(Some(stale_session("")));

    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();

    let script = thread::spawn(move || {
        // Exactly one request may arrive; a refresh attempt would hang the
        // client on a second recv and fail the join below.
        let request = server.recv().unwrap();
        assert_eq!(request.url(), "/api/v1/auth/me");
        request
            .respond(Response::from_string("{}").with_status_code(401))
            .unwrap();
    });

    let client = client_for(port, sessions.clone());
    let err = client.me().expect_err("401 without refresh credential");
    assert!(matches!(err, Error::Unauthorized));
    // Without a refresh attempt there is nothing to tear down.
    assert!(sessions.get().is_some());

    script.join().unwrap();
}
