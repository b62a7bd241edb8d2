//! Request shapes produced by the client wrappers.

mod support;

use std::time::Duration;

use client_core::{
    ChannelListener, CreateRoomRequest, ErrorCategory, Presence, ReceiptType, RoomPreset,
    RoomVisibility, SessionStore, StopReason, SyncConfig,
};
use client_matrix::{Client, RequestBody};
use reqwest::Method;
use serde_json::{Value, json};
use support::{
    ScriptedTransport, WAIT, empty_sync, logged_in_session, message, sync_body, wait_for_status,
};

fn client(transport: &std::sync::Arc<ScriptedTransport>, session: SessionStore) -> Client {
    Client::from_parts(
        "https://example.org",
        transport.clone(),
        session,
        SyncConfig::default().with_long_poll_timeout(Duration::from_millis(500)),
    )
}

fn json_body(body: &Option<RequestBody>) -> Value {
    match body {
        Some(RequestBody::Json(value)) => value.clone(),
        other => panic!("expected a JSON body, got {other:?}"),
    }
}

#[tokio::test]
async fn operations_require_a_session() {
    let transport = ScriptedTransport::new();
    let client = client(&transport, SessionStore::new());

    let err = client
        .send_text("!r:example.org", "hi", None)
        .await
        .expect_err("sending needs a login");
    assert_eq!(err.category, ErrorCategory::Auth);
    assert_eq!(err.code, "not_logged_in");

    assert!(client.join_room("!r:example.org").await.is_err());
    assert!(client.set_presence(Presence::Online, None).await.is_err());
    assert!(client.start_sync().await.is_err());
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn password_login_stores_session_and_starts_sync() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({
        "access_token": "tok-new",
        "user_id": "@alice:example.org",
        "device_id": "DEV1",
        "home_server": "example.org"
    }));
    transport.reply(sync_body("s1", "!r:example.org", vec![message("$e1", "welcome")]));
    let session = SessionStore::new();
    let client = client(&transport, session.clone());
    let (listener, mut events) = ChannelListener::new();
    client.add_listener(listener);

    let credential = client
        .login_password("alice", "hunter2", None)
        .await
        .expect("login should succeed");
    assert_eq!(credential.user_id, "@alice:example.org");
    assert_eq!(credential.device_id.as_deref(), Some("DEV1"));
    assert!(client.is_logged_in());

    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("sync should deliver")
        .expect("channel open");
    assert_eq!(event.event_id, "$e1");
    client.stop_sync().await;

    let login = &transport.requests()[0];
    assert_eq!(login.method, Method::POST);
    assert_eq!(login.path, "/_matrix/client/v3/login");
    assert!(!login.authenticated);
    assert_eq!(
        json_body(&login.body),
        json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": "alice"},
            "password": "hunter2"
        })
    );
}

#[tokio::test]
async fn failed_login_leaves_no_session() {
    let transport = ScriptedTransport::new();
    transport.fail_status(403, json!({"errcode": "M_FORBIDDEN", "error": "Invalid password"}));
    let client = client(&transport, SessionStore::new());

    let err = client
        .login_password("alice", "wrong", Some("DEV"))
        .await
        .expect_err("login should fail");
    assert_eq!(err.code, "M_FORBIDDEN");
    assert!(!client.is_logged_in());
    assert!(!client.sync_status().running());
    assert_eq!(json_body(&transport.requests()[0].body)["device_id"], "DEV");
}

#[tokio::test]
async fn token_login_is_confirmed_with_whoami() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"user_id": "@alice:example.org", "device_id": "DEV2"}));
    let client = client(&transport, SessionStore::new());

    let credential = client.login_token("tok-existing").await.expect("token is valid");
    assert_eq!(credential.access_token, "tok-existing");
    assert_eq!(credential.user_id, "@alice:example.org");
    assert_eq!(credential.device_id.as_deref(), Some("DEV2"));

    transport.wait_for_requests(2).await;
    let whoami = &transport.requests()[0];
    assert_eq!(whoami.path, "/_matrix/client/v3/account/whoami");
    assert_eq!(whoami.access_token.as_deref(), Some("tok-existing"));
    let sync = &transport.requests()[1];
    assert_eq!(sync.path, "/_matrix/client/v3/sync");
    assert_eq!(sync.access_token, None);
    client.stop_sync().await;
}

#[tokio::test]
async fn rejected_token_leaves_no_session() {
    let transport = ScriptedTransport::new();
    transport.fail_status(401, json!({"errcode": "M_UNKNOWN_TOKEN", "error": "bad"}));
    let client = client(&transport, SessionStore::new());

    let err = client.login_token("tok-stale").await.expect_err("token rejected");
    assert_eq!(err.category, ErrorCategory::Auth);
    assert!(client.session().is_none());
}

#[tokio::test]
async fn rejected_token_keeps_the_live_session_syncing() {
    let transport = ScriptedTransport::new();
    let client = client(&transport, logged_in_session());
    client.start_sync().await.expect("sync starts");
    transport.wait_for_requests(1).await;
    transport.fail_status(401, json!({"errcode": "M_UNKNOWN_TOKEN", "error": "bad"}));

    let err = client.login_token("tok-bad").await.expect_err("token rejected");
    assert_eq!(err.code, "M_UNKNOWN_TOKEN");

    let session = client.session().expect("previous session survives");
    assert_eq!(session.access_token, "tok");
    assert_eq!(session.user_id, "@alice:example.org");
    assert!(client.sync_status().running());
    assert_eq!(transport.requests()[1].access_token.as_deref(), Some("tok-bad"));
    client.stop_sync().await;
}

#[tokio::test]
async fn relogin_as_another_user_starts_from_initial_sync() {
    let transport = ScriptedTransport::new();
    transport.reply(empty_sync("alice_s9"));
    let client = client(&transport, logged_in_session());
    client.start_sync().await.expect("sync starts");
    transport.wait_for_requests(2).await;

    transport.reply(json!({}));
    client.logout().await.expect("logout succeeds");
    assert_eq!(client.engine().since(), None);

    transport.reply(json!({
        "access_token": "tok-bob",
        "user_id": "@bob:example.org",
        "device_id": "BOB"
    }));
    client
        .login_password("bob", "pw", None)
        .await
        .expect("login should succeed");
    transport.wait_for_requests(5).await;
    client.stop_sync().await;

    assert_eq!(
        transport.since_values(),
        vec![None, Some("alice_s9".to_owned()), None, None, None]
    );
    assert_eq!(transport.requests()[4].path, "/_matrix/client/v3/sync");
}

#[tokio::test]
async fn token_refresh_for_the_same_device_keeps_the_resume_token() {
    let transport = ScriptedTransport::new();
    transport.reply(empty_sync("s5"));
    let client = client(&transport, logged_in_session());
    client.start_sync().await.expect("sync starts");
    transport.wait_for_requests(2).await;

    transport.reply(json!({"user_id": "@alice:example.org", "device_id": "DEV"}));
    client.login_token("tok-rotated").await.expect("token is valid");

    assert_eq!(client.engine().since().as_deref(), Some("s5"));
    assert_eq!(client.session().expect("session").access_token, "tok-rotated");
    assert!(client.sync_status().running());
    client.stop_sync().await;
}

#[tokio::test]
async fn jwt_login_does_not_start_sync() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"access_token": "tok", "user_id": "@alice:example.org"}));
    let client = client(&transport, SessionStore::new());

    let credential = client.login_jwt("header.payload.sig", None).await.expect("jwt accepted");
    assert_eq!(credential.home_server, "https://example.org");
    assert!(!client.sync_status().running());
    assert_eq!(
        json_body(&transport.requests()[0].body),
        json!({"type": "org.matrix.login.jwt", "token": "header.payload.sig"})
    );
}

#[tokio::test]
async fn logout_stops_sync_and_clears_session() {
    let transport = ScriptedTransport::new();
    let client = client(&transport, logged_in_session());
    client.start_sync().await.expect("sync starts");
    transport.wait_for_requests(1).await;
    transport.reply(json!({}));

    client.logout().await.expect("logout succeeds");

    assert!(client.session().is_none());
    let status = client.sync_status();
    assert!(!status.running());
    assert!(matches!(
        status.stop_reason,
        Some(StopReason::Requested | StopReason::CredentialsCleared)
    ));
    let logout = transport.requests().pop().expect("logout request");
    assert_eq!(logout.path, "/_matrix/client/v3/logout");
}

#[tokio::test]
async fn logout_all_clears_session_even_on_server_error() {
    let transport = ScriptedTransport::new();
    transport.fail_status(500, json!({"errcode": "M_UNKNOWN", "error": "boom"}));
    let client = client(&transport, logged_in_session());

    assert!(client.logout_all().await.is_err());
    assert!(!client.is_logged_in());
    assert_eq!(transport.requests()[0].path, "/_matrix/client/v3/logout/all");
}

#[tokio::test]
async fn sends_text_with_fresh_transaction_ids() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"event_id": "$1"}));
    transport.reply(json!({"event_id": "$2"}));
    let client = client(&transport, logged_in_session());

    let first = client
        .send_text("!r:example.org", "plain", None)
        .await
        .expect("send succeeds");
    let second = client
        .send_text("!r:example.org", "bold", Some("<b>bold</b>"))
        .await
        .expect("send succeeds");
    assert_eq!((first.as_str(), second.as_str()), ("$1", "$2"));

    let requests = transport.requests();
    assert_eq!(requests[0].method, Method::PUT);
    let prefix = "/_matrix/client/v3/rooms/%21r%3Aexample.org/send/m.room.message/";
    assert!(requests[0].path.starts_with(prefix));
    assert!(requests[1].path.starts_with(prefix));
    assert_ne!(requests[0].path, requests[1].path);

    assert_eq!(json_body(&requests[0].body), json!({"msgtype": "m.text", "body": "plain"}));
    assert_eq!(
        json_body(&requests[1].body),
        json!({
            "msgtype": "m.text",
            "body": "bold",
            "format": "org.matrix.custom.html",
            "formatted_body": "<b>bold</b>"
        })
    );
}

#[tokio::test]
async fn room_membership_operations() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"room_id": "!joined:example.org"}));
    transport.reply(json!({}));
    transport.reply(json!({"room_id": "!created:example.org"}));
    let client = client(&transport, logged_in_session());

    assert_eq!(
        client.join_room("#lobby:example.org").await.expect("join"),
        "!joined:example.org"
    );
    client.leave_room("!joined:example.org").await.expect("leave");
    let created = client
        .create_room(
            &CreateRoomRequest::new(RoomPreset::PrivateChat, RoomVisibility::Private)
                .with_name("Ops")
                .with_invite("@bob:example.org"),
        )
        .await
        .expect("create");
    assert_eq!(created, "!created:example.org");

    let requests = transport.requests();
    assert_eq!(requests[0].path, "/_matrix/client/v3/join/%23lobby%3Aexample.org");
    assert_eq!(requests[1].path, "/_matrix/client/v3/rooms/%21joined%3Aexample.org/leave");
    assert_eq!(requests[2].path, "/_matrix/client/v3/createRoom");
    assert_eq!(
        json_body(&requests[2].body),
        json!({
            "preset": "private_chat",
            "visibility": "private",
            "name": "Ops",
            "invite": ["@bob:example.org"]
        })
    );
}

#[tokio::test]
async fn resolves_aliases_and_passes_ids_through() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"room_id": "!lobby:example.org", "servers": ["example.org"]}));
    let client = client(&transport, logged_in_session());

    assert_eq!(
        client.resolve_room_alias("!already:example.org").await.expect("id passes"),
        "!already:example.org"
    );
    assert_eq!(transport.request_count(), 0);
    assert_eq!(
        client.resolve_room_alias("#lobby:example.org").await.expect("alias resolves"),
        "!lobby:example.org"
    );
    assert_eq!(
        transport.requests()[0].path,
        "/_matrix/client/v3/directory/room/%23lobby%3Aexample.org"
    );
}

#[tokio::test]
async fn moderation_requests_carry_target_and_reason() {
    let transport = ScriptedTransport::new();
    for _ in 0..3 {
        transport.reply(json!({}));
    }
    let client = client(&transport, logged_in_session());

    client
        .kick_user("!r:example.org", "@spam:example.org", Some("spam"))
        .await
        .expect("kick");
    client
        .ban_user("!r:example.org", "@spam:example.org", None)
        .await
        .expect("ban");
    client
        .unban_user("!r:example.org", "@spam:example.org")
        .await
        .expect("unban");

    let requests = transport.requests();
    let actions: Vec<_> = requests
        .iter()
        .map(|r| r.path.rsplit('/').next().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(actions, ["kick", "ban", "unban"]);
    assert_eq!(
        json_body(&requests[0].body),
        json!({"user_id": "@spam:example.org", "reason": "spam"})
    );
    assert_eq!(json_body(&requests[1].body), json!({"user_id": "@spam:example.org"}));
}

#[tokio::test]
async fn ephemeral_requests() {
    let transport = ScriptedTransport::new();
    for _ in 0..4 {
        transport.reply(json!({}));
    }
    let client = client(&transport, logged_in_session());

    client.set_typing("!r:example.org", true, 4000).await.expect("typing");
    client.set_typing("!r:example.org", false, 4000).await.expect("typing off");
    client
        .send_read_receipt("!r:example.org", "$e1", ReceiptType::Read)
        .await
        .expect("receipt");
    client
        .set_presence(Presence::Unavailable, Some("lunch"))
        .await
        .expect("presence");

    let requests = transport.requests();
    assert_eq!(
        requests[0].path,
        "/_matrix/client/v3/rooms/%21r%3Aexample.org/typing/%40alice%3Aexample.org"
    );
    assert_eq!(json_body(&requests[0].body), json!({"typing": true, "timeout": 4000}));
    assert_eq!(json_body(&requests[1].body), json!({"typing": false}));
    assert_eq!(
        requests[2].path,
        "/_matrix/client/v3/rooms/%21r%3Aexample.org/receipt/m.read/%24e1"
    );
    assert_eq!(
        requests[3].path,
        "/_matrix/client/v3/presence/%40alice%3Aexample.org/status"
    );
    assert_eq!(
        json_body(&requests[3].body),
        json!({"presence": "unavailable", "status_msg": "lunch"})
    );
}

#[tokio::test]
async fn room_members_normalizes_profiles() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"joined": {
        "@bob:example.org": {"display_name": "Bob", "avatar_url": ""},
        "@alice:example.org": {}
    }}));
    let client = client(&transport, logged_in_session());

    let members = client.room_members("!r:example.org").await.expect("members");
    assert_eq!(members.len(), 2);
    assert_eq!(members[0].user_id, "@alice:example.org");
    assert_eq!(members[0].display_name, None);
    assert_eq!(members[1].display_name.as_deref(), Some("Bob"));
    assert_eq!(members[1].avatar_url, None);
}

#[tokio::test]
async fn fetches_single_event() {
    let transport = ScriptedTransport::new();
    transport.reply(message("$e1", "fetched"));
    transport.reply(json!({"type": "m.room.message"}));
    let client = client(&transport, logged_in_session());

    let event = client.room_event("!r:example.org", "$e1").await.expect("event");
    assert_eq!(event.body(), Some("fetched"));
    assert_eq!(event.room_id, "!r:example.org");

    let err = client
        .room_event("!r:example.org", "$broken")
        .await
        .expect_err("incomplete event is rejected");
    assert_eq!(err.category, ErrorCategory::Protocol);
}

#[tokio::test]
async fn reuses_existing_direct_room() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"@bob:example.org": ["!dm:example.org"]}));
    let client = client(&transport, logged_in_session());

    let room = client
        .get_or_create_direct_room("@bob:example.org")
        .await
        .expect("direct room");
    assert_eq!(room, "!dm:example.org");
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn creates_and_records_missing_direct_room() {
    let transport = ScriptedTransport::new();
    transport.fail_status(404, json!({"errcode": "M_NOT_FOUND", "error": "no data"}));
    transport.reply(json!({"room_id": "!new:example.org"}));
    transport.reply(json!({}));
    let client = client(&transport, logged_in_session());

    let room = client
        .get_or_create_direct_room("@bob:example.org")
        .await
        .expect("direct room");
    assert_eq!(room, "!new:example.org");

    let requests = transport.requests();
    assert_eq!(
        json_body(&requests[1].body)["is_direct"],
        json!(true)
    );
    assert_eq!(requests[2].method, Method::PUT);
    assert_eq!(
        requests[2].path,
        "/_matrix/client/v3/user/%40alice%3Aexample.org/account_data/m.direct"
    );
    assert_eq!(
        json_body(&requests[2].body),
        json!({"@bob:example.org": ["!new:example.org"]})
    );
}

#[tokio::test]
async fn upload_returns_content_uri() {
    let transport = ScriptedTransport::new();
    transport.reply(json!({"content_uri": "mxc://example.org/abc"}));
    let client = client(&transport, logged_in_session());

    let uri = client
        .upload("image/png", vec![1, 2, 3], Some("cat.png"))
        .await
        .expect("upload");
    assert_eq!(uri, "mxc://example.org/abc");

    let request = &transport.requests()[0];
    assert_eq!(request.path, "/_matrix/media/v3/upload");
    assert_eq!(request.query_param("filename"), Some("cat.png"));
    assert_eq!(
        request.body,
        Some(RequestBody::Bytes {
            content_type: "image/png".to_owned(),
            data: vec![1, 2, 3]
        })
    );
}

#[tokio::test]
async fn sync_status_is_observable_through_the_client() {
    let transport = ScriptedTransport::new();
    transport.fail_status(403, json!({"errcode": "M_FORBIDDEN", "error": "deactivated"}));
    let client = client(&transport, logged_in_session());
    let mut status = client.subscribe_sync_status();

    assert_eq!(client.start_sync().await, Ok(true));
    let stopped = wait_for_status(&mut status, |s| s.stop_reason.is_some()).await;
    assert_eq!(stopped.stop_reason, Some(StopReason::Unrecoverable));
    assert_eq!(
        client.engine().last_error().map(|e| e.code),
        Some("M_FORBIDDEN".to_owned())
    );
}
