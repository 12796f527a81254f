//! Authenticated client behaviour under refresh, rotation, notices and logout.

mod common;

use bridge_traits::{BridgeError, HttpMethod, HttpRequest, HttpResponse};
use common::*;
use core_auth::session_store::AUTH_TOKEN_KEY;
use core_auth::{AuthError, Credential, UserRecord};
use core_runtime::events::{CoreEvent, NoticeEvent};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DIARY_PATH: &str = "/api/diary";

async fn sign_in(h: &Harness, access_token: &str) {
    h.manager
        .login(
            UserRecord::new("7"),
            Some(Credential::new(access_token, Some("r1".to_string()))),
        )
        .await
        .unwrap();
}

fn diary() -> HttpRequest {
    HttpRequest::new(HttpMethod::Get, Harness::url(DIARY_PATH))
}

/// Diary endpoint that accepts only `valid`.
fn accept_only(h: &Harness, valid: &str) {
    let valid = valid.to_string();
    h.http.on(DIARY_PATH, move |request| {
        if bearer(request).as_deref() == Some(valid.as_str()) {
            Ok(json_response(200, json!({ "entries": [] })))
        } else {
            Ok(HttpResponse::new(401))
        }
    });
}

fn notices(rx: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<NoticeEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let CoreEvent::Notice(notice) = event {
            seen.push(notice);
        }
    }
    seen
}

#[tokio::test]
async fn test_attaches_bearer_header() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t1");

    let response = h.client.execute(diary()).await.unwrap();

    assert_eq!(response.status, 200);
    let sent = h.http.requests_to(DIARY_PATH);
    assert_eq!(sent.len(), 1);
    assert_eq!(bearer(&sent[0]).as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_public_request_without_session() {
    let h = Harness::new();
    h.http.on("/api/notice", |_| Ok(HttpResponse::new(200)));

    let response = h
        .client
        .execute(HttpRequest::new(HttpMethod::Get, Harness::url("/api/notice")))
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert!(bearer(&h.http.requests_to("/api/notice")[0]).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_401s_share_one_refresh() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t2");

    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    h.http
        .on_delayed(REFRESH_PATH, Some(Duration::from_millis(200)), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(json_response(200, json!({ "token": "t2", "refreshToken": "r2" })))
        });

    let (a, b, c) = tokio::join!(
        h.client.execute(diary()),
        h.client.execute(diary()),
        h.client.execute(diary())
    );

    for result in [a, b, c] {
        assert_eq!(result.unwrap().status, 200);
    }
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(h.http.calls(REFRESH_PATH), 1);

    let sent = h.http.requests_to(DIARY_PATH);
    assert_eq!(sent.len(), 6);
    let retried: Vec<_> = sent.iter().filter_map(bearer).filter(|t| t == "t2").collect();
    assert_eq!(retried.len(), 3);
    assert_eq!(h.memory.get_string(AUTH_TOKEN_KEY).as_deref(), Some("t2"));
}

#[tokio::test]
async fn test_requests_after_refresh_use_new_credential() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t2");
    h.http.on(REFRESH_PATH, |_| {
        Ok(json_response(200, json!({ "token": "t2", "refreshToken": "r2" })))
    });

    h.client.execute(diary()).await.unwrap();
    h.client.execute(diary()).await.unwrap();

    assert_eq!(h.http.calls(REFRESH_PATH), 1);
    let sent = h.http.requests_to(DIARY_PATH);
    assert_eq!(sent.len(), 3);
    assert_eq!(bearer(&sent[2]).as_deref(), Some("t2"));
}

#[tokio::test]
async fn test_second_401_is_terminal() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http.on(DIARY_PATH, |_| Ok(HttpResponse::new(401)));
    h.http.on(REFRESH_PATH, |_| {
        Ok(json_response(200, json!({ "token": "t2", "refreshToken": "r2" })))
    });
    let mut rx = h.events.subscribe();

    let err = h.client.execute(diary()).await.unwrap_err();

    assert!(matches!(err, AuthError::Unauthorized { status: 401 }));
    assert_eq!(h.http.calls(DIARY_PATH), 2);
    assert_eq!(h.http.calls(REFRESH_PATH), 1);
    assert_eq!(notices(&mut rx), vec![NoticeEvent::SessionExpired]);
}

#[tokio::test]
async fn test_failed_refresh_surfaces_unauthorized() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t2");
    h.http.on(REFRESH_PATH, |_| Ok(HttpResponse::new(400)));

    let err = h.client.execute(diary()).await.unwrap_err();

    assert!(matches!(err, AuthError::Unauthorized { .. }));
    assert_eq!(h.http.calls(DIARY_PATH), 1);
    // The old credential is left for the caller to decide on.
    assert_eq!(h.manager.access_token().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_rotation_header_on_success() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http.on(DIARY_PATH, |_| {
        Ok(HttpResponse::new(200).with_header("bearer_token", "  rotated-token-value  "))
    });

    h.client.execute(diary()).await.unwrap();

    assert_eq!(h.manager.access_token().as_deref(), Some("rotated-token-value"));
    assert_eq!(
        h.memory.get_string(AUTH_TOKEN_KEY).as_deref(),
        Some("rotated-token-value")
    );
    assert_eq!(
        h.manager.state().credential().unwrap().refresh_token(),
        Some("r1")
    );
}

#[tokio::test]
async fn test_short_rotation_header_is_ignored() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http.on(DIARY_PATH, |_| {
        Ok(HttpResponse::new(200).with_header("bearer_token", "short"))
    });

    h.client.execute(diary()).await.unwrap();
    assert_eq!(h.manager.access_token().as_deref(), Some("t1"));
}

#[tokio::test]
async fn test_maintenance_notice_is_debounced() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http.on(DIARY_PATH, |_| Ok(HttpResponse::new(503)));
    let mut rx = h.events.subscribe();

    for _ in 0..3 {
        let err = h.client.execute(diary()).await.unwrap_err();
        assert!(matches!(err, AuthError::ServerMaintenance));
    }
    assert_eq!(notices(&mut rx), vec![NoticeEvent::Maintenance]);

    h.clock.advance(Duration::from_secs(5));
    h.client.execute(diary()).await.unwrap_err();
    assert_eq!(notices(&mut rx), vec![NoticeEvent::Maintenance]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_network_error_not_unauthorized() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http
        .on_delayed(DIARY_PATH, Some(Duration::from_secs(30)), |_| {
            Ok(HttpResponse::new(401))
        });
    h.http.on("/api/other", |_| {
        Err(BridgeError::Connectivity("connection reset".into()))
    });
    let mut rx = h.events.subscribe();

    let err = h.client.execute(diary()).await.unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));
    assert_eq!(h.http.calls(REFRESH_PATH), 0);

    let err = h
        .client
        .execute(HttpRequest::new(HttpMethod::Get, Harness::url("/api/other")))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Network(_)));

    // Two failures inside one window, one notice.
    assert_eq!(notices(&mut rx), vec![NoticeEvent::NetworkError]);
}

#[tokio::test]
async fn test_other_statuses_are_delivered() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http.on(DIARY_PATH, |_| Ok(json_response(422, json!({ "error": "bad date" }))));

    let response = h.client.execute(diary()).await.unwrap();
    assert_eq!(response.status, 422);
}

#[tokio::test]
async fn test_requests_after_logout_never_leave_the_process() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t1");
    h.http.on(LOGOUT_PATH, |_| Ok(HttpResponse::new(200)));

    h.manager.logout().await.unwrap();
    let err = h.client.execute(diary()).await.unwrap_err();

    assert!(matches!(err, AuthError::Cancelled));
    assert_eq!(h.http.calls(DIARY_PATH), 0);
}

#[tokio::test(start_paused = true)]
async fn test_response_arriving_during_logout_is_cancelled() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    h.http
        .on_delayed(DIARY_PATH, Some(Duration::from_millis(500)), |_| {
            Ok(HttpResponse::new(503))
        });
    h.http.on(LOGOUT_PATH, |_| Ok(HttpResponse::new(200)));
    let mut rx = h.events.subscribe();

    let request = h.client.execute(diary());
    let logout = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.manager.logout().await
    };
    let (result, logged_out) = tokio::join!(request, logout);

    logged_out.unwrap();
    assert!(matches!(result, Err(AuthError::Cancelled)));
    assert!(notices(&mut rx).is_empty(), "no notice after logout began");
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_refresh_cancels_waiters() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t2");
    h.http
        .on_delayed(REFRESH_PATH, Some(Duration::from_millis(500)), |_| {
            Ok(json_response(200, json!({ "token": "t2", "refreshToken": "r2" })))
        });
    h.http.on(LOGOUT_PATH, |_| Ok(HttpResponse::new(200)));

    let request = h.client.execute(diary());
    let logout = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.manager.logout().await
    };
    let (result, logged_out) = tokio::join!(request, logout);
    logged_out.unwrap();

    assert!(matches!(result, Err(AuthError::Cancelled)));
    assert_eq!(h.http.calls(DIARY_PATH), 1);

    // Let the abandoned refresh finish; it must not resurrect the session.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.manager.access_token().is_none());
    assert!(h.memory.get_string(AUTH_TOKEN_KEY).is_none());
}

#[tokio::test]
async fn test_login_after_logout_lifts_barrier() {
    let h = Harness::new();
    sign_in(&h, "t1").await;
    accept_only(&h, "t3");
    h.http.on(LOGOUT_PATH, |_| Ok(HttpResponse::new(200)));

    h.manager.logout().await.unwrap();
    sign_in(&h, "t3").await;

    assert_eq!(h.client.execute(diary()).await.unwrap().status, 200);
}
