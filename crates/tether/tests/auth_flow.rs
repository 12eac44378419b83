mod common;

use chrono::Duration;
use common::{Server, TEST_PASSWORD};
use tether::CoreError;
use tether::auth::AuthOutcome;
use tether::session::SessionOptions;
use tether::session::cookie::{RememberMeToken, encode_remember_me, session_id_from_header};

const EMAIL: &str = "alice@example.com";

async fn registered() -> Server {
    let server = Server::new().await;
    server
        .auth
        .register(EMAIL, TEST_PASSWORD, "Alice", SessionOptions::default())
        .await
        .unwrap();
    server
}

#[tokio::test]
async fn five_failures_block_until_window_passes() {
    let server = registered().await;

    for _ in 0..5 {
        let err = server
            .auth
            .login(EMAIL, "wrong-password-1", SessionOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
    }

    // Blocked even with the right password.
    let err = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "RATE_LIMITED");
    match err {
        CoreError::RateLimited { retry_after_secs } => {
            assert!((1..=15 * 60).contains(&retry_after_secs));
        }
        other => panic!("unexpected error {other:?}"),
    }

    server.clock.advance(Duration::minutes(16));
    let signed_in = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap();
    assert_eq!(signed_in.user.email, EMAIL);
}

#[tokio::test]
async fn unknown_user_and_wrong_password_look_the_same() {
    let server = registered().await;
    let unknown = server
        .auth
        .login("nobody@example.com", TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap_err();
    let wrong = server
        .auth
        .login(EMAIL, "wrong-password-1", SessionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(unknown, wrong);
    assert_eq!(unknown.user_message(), wrong.user_message());
}

#[tokio::test]
async fn short_session_expires_after_a_day() {
    let server = registered().await;
    let session = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap()
        .session;
    assert_eq!(session.expires_at - session.created_at, Duration::hours(24));

    server.clock.advance(Duration::hours(20));
    assert!(matches!(
        server.auth.require_auth(Some(&session.id)).await,
        AuthOutcome::Authenticated(_)
    ));

    // Renewal happens only inside the last hour.
    server.clock.advance(Duration::hours(5));
    assert!(matches!(
        server.auth.require_auth(Some(&session.id)).await,
        AuthOutcome::Redirect(ref path) if path == "/login"
    ));
}

#[tokio::test]
async fn remembered_session_lasts_thirty_days_and_is_renewed() {
    let server = registered().await;
    let session = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::remember_me())
        .await
        .unwrap()
        .session;
    assert_eq!(session.expires_at - session.created_at, Duration::days(30));

    server.clock.advance(Duration::days(30) - Duration::minutes(30));
    let renewed = match server.auth.require_auth(Some(&session.id)).await {
        AuthOutcome::Authenticated(renewed) => renewed,
        AuthOutcome::Redirect(_) => panic!("session should still be valid"),
    };
    assert!(renewed.expires_at > session.expires_at);

    let cookie = encode_remember_me(&RememberMeToken {
        user_id: renewed.user_id.clone(),
        session_id: renewed.id.clone(),
    });
    let restored = server.auth.restore_from_remember_me(&cookie).await.unwrap();
    assert_eq!(restored.id, session.id);
}

#[tokio::test]
async fn password_change_revokes_other_sessions() {
    let server = registered().await;
    let first = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap();
    let second = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap();

    let fresh = server
        .auth
        .change_password(
            &first.user.id,
            TEST_PASSWORD,
            "even-better-pass-2",
            SessionOptions::default(),
        )
        .await
        .unwrap();

    for stale in [&first.session.id, &second.session.id] {
        assert!(server.sessions.validate_session(stale).await.is_none());
    }
    assert!(server.sessions.validate_session(&fresh.id).await.is_some());

    let err = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::InvalidCredentials);
}

#[tokio::test]
async fn session_cookie_header_resolves_to_user() {
    let server = registered().await;
    let session = server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::default())
        .await
        .unwrap()
        .session;

    let header = format!("theme=dark; session_id={}", session.id);
    let token = session_id_from_header(&header);
    let user = server.auth.get_current_user(token.as_deref()).await.unwrap();
    assert_eq!(user.email, EMAIL);

    assert!(server.auth.get_current_user(None).await.is_none());
}

#[tokio::test]
async fn sweep_removes_only_expired_sessions() {
    let server = registered().await;
    server
        .auth
        .login(EMAIL, TEST_PASSWORD, SessionOptions::remember_me())
        .await
        .unwrap();

    server.clock.advance(Duration::days(2));
    // The registration session and nothing else.
    assert_eq!(server.sessions.sweep_expired().await.unwrap(), 1);
    assert_eq!(server.sessions.sweep_expired().await.unwrap(), 0);
}
