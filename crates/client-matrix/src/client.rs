//! Request wrappers for the client-server API, bound to one session and one sync engine.

use std::{collections::BTreeMap, sync::Arc};

use client_core::{
    ClientError, CreateRoomRequest, Credential, ErrorCategory, EventListener, EventSource,
    ListenerHandle, Member, Presence, ReceiptType, RoomEvent, RoomMembership, SessionStore,
    SyncConfig, SyncStatus,
};
use serde_json::{Map, Value, json};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    engine::SyncEngine,
    paths,
    transport::{ApiRequest, HttpTransport, Transport, TransportError},
};

const DIRECT_ACCOUNT_DATA: &str = "m.direct";

/// Handle to one homeserver session. Cheap to clone; clones share the session and engine.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    homeserver: String,
    transport: Arc<dyn Transport>,
    session: SessionStore,
    engine: SyncEngine,
}

impl Client {
    pub fn new(homeserver: &str) -> Result<Self, ClientError> {
        Self::with_config(homeserver, SyncConfig::default())
    }

    pub fn with_config(homeserver: &str, config: SyncConfig) -> Result<Self, ClientError> {
        let session = SessionStore::new();
        let transport = HttpTransport::new(homeserver, Arc::new(session.clone()))?;
        Ok(Self::from_parts(homeserver, Arc::new(transport), session, config))
    }

    /// Assemble a client over an arbitrary transport. The transport should read
    /// its bearer token from `session`.
    pub fn from_parts(
        homeserver: impl Into<String>,
        transport: Arc<dyn Transport>,
        session: SessionStore,
        config: SyncConfig,
    ) -> Self {
        let engine = SyncEngine::new(Arc::clone(&transport), Arc::new(session.clone()), config);
        Self {
            inner: Arc::new(ClientInner {
                homeserver: homeserver.into(),
                transport,
                session,
                engine,
            }),
        }
    }

    pub fn homeserver(&self) -> &str {
        &self.inner.homeserver
    }

    pub fn session(&self) -> Option<Credential> {
        self.inner.session.current()
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session.is_logged_in()
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.inner.engine
    }

    // Session

    /// Log in with a user name and password, store the session and start syncing.
    pub async fn login_password(
        &self,
        user: &str,
        password: &str,
        device_id: Option<&str>,
    ) -> Result<Credential, ClientError> {
        let mut body = json!({
            "type": "m.login.password",
            "identifier": {"type": "m.id.user", "user": user},
            "password": password,
        });
        if let Some(device_id) = device_id {
            body["device_id"] = Value::from(device_id);
        }
        let credential = self.login(body).await?;
        self.inner.engine.start().await;
        Ok(credential)
    }

    /// Log in with a JSON web token. Syncing is left to the caller; a loop
    /// running for a different session is stopped.
    pub async fn login_jwt(&self, token: &str, device_id: Option<&str>) -> Result<Credential, ClientError> {
        let mut body = json!({"type": "org.matrix.login.jwt", "token": token});
        if let Some(device_id) = device_id {
            body["device_id"] = Value::from(device_id);
        }
        self.login(body).await
    }

    /// Adopt an existing access token, confirm it via `whoami`, and start syncing.
    ///
    /// The token is vetted on its own; a rejected one leaves the current session untouched.
    pub async fn login_token(&self, access_token: &str) -> Result<Credential, ClientError> {
        let request =
            ApiRequest::get(paths::client(&["account", "whoami"])).with_access_token(access_token);
        let response = self.call(request).await?;
        let user_id = string_field(&response, "user_id")
            .ok_or_else(|| ClientError::protocol("whoami response lacks user_id"))?;

        let mut credential = Credential::new(access_token, user_id, self.inner.homeserver.clone());
        credential.device_id = string_field(&response, "device_id");
        self.adopt_session(credential.clone()).await;
        info!(user_id = %credential.user_id, "session restored from access token");

        self.inner.engine.start().await;
        Ok(credential)
    }

    async fn login(&self, body: Value) -> Result<Credential, ClientError> {
        let request = ApiRequest::post(paths::client(&["login"]))
            .with_json(body)
            .unauthenticated();
        let response = self.call(request).await?;

        let access_token = string_field(&response, "access_token")
            .ok_or_else(|| ClientError::protocol("login response lacks access_token"))?;
        let user_id = string_field(&response, "user_id")
            .ok_or_else(|| ClientError::protocol("login response lacks user_id"))?;
        let home_server =
            string_field(&response, "home_server").unwrap_or_else(|| self.inner.homeserver.clone());

        let mut credential = Credential::new(access_token, user_id, home_server);
        credential.device_id = string_field(&response, "device_id");
        self.adopt_session(credential.clone()).await;
        info!(user_id = %credential.user_id, device_id = ?credential.device_id, "logged in");
        Ok(credential)
    }

    /// Store `next` as the session. Unless it is the same user and device as
    /// the stored one, the engine is stopped and its resume token dropped.
    async fn adopt_session(&self, next: Credential) {
        let continues = self.inner.session.current().is_some_and(|current| {
            current.user_id == next.user_id && current.device_id == next.device_id
        });
        if !continues {
            self.inner.engine.reset().await;
        }
        self.inner.session.set(next);
    }

    /// Invalidate this device's token, stop syncing and drop the session.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.end_session(&["logout"]).await
    }

    /// Invalidate every token of this user, stop syncing and drop the session.
    pub async fn logout_all(&self) -> Result<(), ClientError> {
        self.end_session(&["logout", "all"]).await
    }

    async fn end_session(&self, path: &[&str]) -> Result<(), ClientError> {
        self.require_session()?;
        let result = self
            .call(ApiRequest::post(paths::client(path)).with_json(json!({})))
            .await;

        // The local session goes away even when the server call failed.
        self.inner.session.clear();
        self.inner.engine.reset().await;
        if let Err(err) = &result {
            warn!(code = %err.code, "server rejected logout; local session cleared anyway");
        } else {
            info!("logged out");
        }
        result.map(|_| ())
    }

    pub async fn whoami(&self) -> Result<String, ClientError> {
        self.require_session()?;
        let response = self
            .call(ApiRequest::get(paths::client(&["account", "whoami"])))
            .await?;
        string_field(&response, "user_id")
            .ok_or_else(|| ClientError::protocol("whoami response lacks user_id"))
    }

    // Rooms

    /// Join by room id or alias; returns the joined room id.
    pub async fn join_room(&self, room_id_or_alias: &str) -> Result<String, ClientError> {
        self.require_session()?;
        let response = self
            .call(ApiRequest::post(paths::client(&["join", room_id_or_alias])).with_json(json!({})))
            .await?;
        string_field(&response, "room_id")
            .ok_or_else(|| ClientError::protocol("join response lacks room_id"))
    }

    pub async fn leave_room(&self, room_id: &str) -> Result<(), ClientError> {
        self.require_session()?;
        self.call(ApiRequest::post(paths::client(&["rooms", room_id, "leave"])).with_json(json!({})))
            .await
            .map(|_| ())
    }

    /// Create a room; returns its id.
    pub async fn create_room(&self, request: &CreateRoomRequest) -> Result<String, ClientError> {
        self.require_session()?;
        let body = to_json(request)?;
        let response = self
            .call(ApiRequest::post(paths::client(&["createRoom"])).with_json(body))
            .await?;
        string_field(&response, "room_id")
            .ok_or_else(|| ClientError::protocol("createRoom response lacks room_id"))
    }

    /// Resolve `#alias:server` to a room id. Anything else is returned unchanged.
    pub async fn resolve_room_alias(&self, room_id_or_alias: &str) -> Result<String, ClientError> {
        if !room_id_or_alias.starts_with('#') {
            return Ok(room_id_or_alias.to_owned());
        }
        self.require_session()?;
        let response = self
            .call(ApiRequest::get(paths::client(&["directory", "room", room_id_or_alias])))
            .await?;
        string_field(&response, "room_id")
            .ok_or_else(|| ClientError::protocol("directory response lacks room_id"))
    }

    /// Joined members, ordered by user id.
    pub async fn room_members(&self, room_id: &str) -> Result<Vec<Member>, ClientError> {
        self.require_session()?;
        let response = self
            .call(ApiRequest::get(paths::client(&["rooms", room_id, "joined_members"])))
            .await?;
        let joined = response
            .get("joined")
            .and_then(Value::as_object)
            .ok_or_else(|| ClientError::protocol("joined_members response lacks joined"))?;

        let mut members: Vec<Member> = joined
            .iter()
            .map(|(user_id, profile)| Member {
                user_id: user_id.clone(),
                display_name: non_empty_field(profile, "display_name"),
                avatar_url: non_empty_field(profile, "avatar_url"),
            })
            .collect();
        members.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(members)
    }

    /// Fetch a single event by id.
    pub async fn room_event(&self, room_id: &str, event_id: &str) -> Result<RoomEvent, ClientError> {
        self.require_session()?;
        let response = self
            .call(ApiRequest::get(paths::client(&["rooms", room_id, "event", event_id])))
            .await?;
        RoomEvent::decode(room_id, &response, EventSource::Timeline, RoomMembership::Joined)
            .map_err(|err| ClientError::protocol(format!("event {event_id}: {err}")))
    }

    // Messaging

    /// Send an `m.text` message, optionally with an HTML rendition.
    pub async fn send_text(
        &self,
        room_id: &str,
        body: &str,
        formatted_html: Option<&str>,
    ) -> Result<String, ClientError> {
        let mut content = json!({"msgtype": "m.text", "body": body});
        if let Some(html) = formatted_html {
            content["format"] = Value::from("org.matrix.custom.html");
            content["formatted_body"] = Value::from(html);
        }
        self.send_message(room_id, content).await
    }

    /// Send arbitrary `m.room.message` content; returns the event id.
    pub async fn send_message(&self, room_id: &str, content: Value) -> Result<String, ClientError> {
        self.send_room_event(room_id, "m.room.message", content).await
    }

    /// Send any room event type under a fresh transaction id; returns the event id.
    pub async fn send_room_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: Value,
    ) -> Result<String, ClientError> {
        self.require_session()?;
        let txn_id = Uuid::new_v4().simple().to_string();
        debug!(room_id, event_type, txn_id = %txn_id, "sending room event");
        let response = self
            .call(
                ApiRequest::put(paths::client(&["rooms", room_id, "send", event_type, &txn_id]))
                    .with_json(content),
            )
            .await?;
        string_field(&response, "event_id")
            .ok_or_else(|| ClientError::protocol("send response lacks event_id"))
    }

    // Moderation

    pub async fn kick_user(&self, room_id: &str, user_id: &str, reason: Option<&str>) -> Result<(), ClientError> {
        self.moderate(room_id, "kick", user_id, reason).await
    }

    pub async fn ban_user(&self, room_id: &str, user_id: &str, reason: Option<&str>) -> Result<(), ClientError> {
        self.moderate(room_id, "ban", user_id, reason).await
    }

    pub async fn unban_user(&self, room_id: &str, user_id: &str) -> Result<(), ClientError> {
        self.moderate(room_id, "unban", user_id, None).await
    }

    async fn moderate(
        &self,
        room_id: &str,
        action: &str,
        user_id: &str,
        reason: Option<&str>,
    ) -> Result<(), ClientError> {
        self.require_session()?;
        let mut body = json!({"user_id": user_id});
        if let Some(reason) = reason {
            body["reason"] = Value::from(reason);
        }
        self.call(ApiRequest::post(paths::client(&["rooms", room_id, action])).with_json(body))
            .await
            .map(|_| ())
    }

    // Ephemeral

    /// Start or stop the typing notification. `timeout_ms` applies only while typing.
    pub async fn set_typing(&self, room_id: &str, typing: bool, timeout_ms: u64) -> Result<(), ClientError> {
        let user_id = self.require_session()?.user_id;
        let mut body = json!({"typing": typing});
        if typing {
            body["timeout"] = Value::from(timeout_ms);
        }
        self.call(
            ApiRequest::put(paths::client(&["rooms", room_id, "typing", &user_id])).with_json(body),
        )
        .await
        .map(|_| ())
    }

    pub async fn send_read_receipt(
        &self,
        room_id: &str,
        event_id: &str,
        receipt: ReceiptType,
    ) -> Result<(), ClientError> {
        self.require_session()?;
        self.call(
            ApiRequest::post(paths::client(&["rooms", room_id, "receipt", receipt.as_str(), event_id]))
                .with_json(json!({})),
        )
        .await
        .map(|_| ())
    }

    pub async fn set_presence(&self, presence: Presence, status_msg: Option<&str>) -> Result<(), ClientError> {
        let user_id = self.require_session()?.user_id;
        let mut body = json!({"presence": presence});
        if let Some(status_msg) = status_msg {
            body["status_msg"] = Value::from(status_msg);
        }
        self.call(ApiRequest::put(paths::client(&["presence", &user_id, "status"])).with_json(body))
            .await
            .map(|_| ())
    }

    // Direct chats

    /// `m.direct` account data: user id to the rooms marked as direct chats with them.
    pub async fn direct_rooms(&self) -> Result<BTreeMap<String, Vec<String>>, ClientError> {
        let user_id = self.require_session()?.user_id;
        let request = ApiRequest::get(paths::client(&[
            "user",
            &user_id,
            "account_data",
            DIRECT_ACCOUNT_DATA,
        ]));
        let response = match self.inner.transport.request(request).await {
            Ok(body) => parse_body(&body)?,
            Err(TransportError::Status { status: 404, .. }) => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };

        let Value::Object(entries) = response else {
            return Err(ClientError::protocol("m.direct account data is not an object"));
        };
        Ok(entries
            .into_iter()
            .map(|(user, rooms)| {
                let rooms: Vec<String> = rooms
                    .as_array()
                    .map(|rooms| {
                        rooms
                            .iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                (user, rooms)
            })
            .collect())
    }

    /// First existing direct room with `user_id`, or a new one recorded in `m.direct`.
    pub async fn get_or_create_direct_room(&self, user_id: &str) -> Result<String, ClientError> {
        let own_user_id = self.require_session()?.user_id;
        let mut direct = self.direct_rooms().await?;
        if let Some(room_id) = direct.get(user_id).and_then(|rooms| rooms.first()) {
            return Ok(room_id.clone());
        }

        let room_id = self.create_room(&CreateRoomRequest::direct(user_id)).await?;
        direct.entry(user_id.to_owned()).or_default().push(room_id.clone());
        let body = to_json(&direct)?;
        self.call(
            ApiRequest::put(paths::client(&[
                "user",
                &own_user_id,
                "account_data",
                DIRECT_ACCOUNT_DATA,
            ]))
            .with_json(body),
        )
        .await?;
        info!(user_id, room_id = %room_id, "created direct room");
        Ok(room_id)
    }

    // Media

    /// Upload bytes to the media repository; returns the `mxc://` URI.
    pub async fn upload(
        &self,
        content_type: &str,
        data: Vec<u8>,
        filename: Option<&str>,
    ) -> Result<String, ClientError> {
        self.require_session()?;
        let mut request = ApiRequest::post(paths::media(&["upload"])).with_bytes(content_type, data);
        if let Some(filename) = filename {
            request = request.with_query(vec![("filename".to_owned(), filename.to_owned())]);
        }
        let response = self.call(request).await?;
        string_field(&response, "content_uri")
            .ok_or_else(|| ClientError::protocol("upload response lacks content_uri"))
    }

    // Sync

    /// Start the background sync loop for the current session.
    pub async fn start_sync(&self) -> Result<bool, ClientError> {
        self.require_session()?;
        Ok(self.inner.engine.start().await)
    }

    pub async fn stop_sync(&self) -> bool {
        self.inner.engine.stop().await
    }

    pub fn add_listener(&self, listener: impl EventListener + 'static) -> ListenerHandle {
        self.inner.engine.add_listener(listener)
    }

    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.inner.engine.remove_listener(handle)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.engine.status()
    }

    pub fn subscribe_sync_status(&self) -> watch::Receiver<SyncStatus> {
        self.inner.engine.subscribe_status()
    }

    fn require_session(&self) -> Result<Credential, ClientError> {
        self.inner
            .session
            .current()
            .filter(|credential| credential.valid)
            .ok_or_else(ClientError::not_logged_in)
    }

    async fn call(&self, request: ApiRequest) -> Result<Value, ClientError> {
        let body = self.inner.transport.request(request).await?;
        parse_body(&body)
    }
}

fn parse_body(body: &str) -> Result<Value, ClientError> {
    if body.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(body)
        .map_err(|err| ClientError::protocol(format!("response is not JSON: {err}")))
}

fn to_json(value: &impl serde::Serialize) -> Result<Value, ClientError> {
    serde_json::to_value(value).map_err(|err| {
        ClientError::new(ErrorCategory::Serialization, "request_serialization", err.to_string())
    })
}

fn string_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_owned)
}

fn non_empty_field(value: &Value, field: &str) -> Option<String> {
    string_field(value, field).filter(|text| !text.is_empty())
}
