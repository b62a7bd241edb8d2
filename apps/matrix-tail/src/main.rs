//! Follow a Matrix account's room events from the terminal.

mod config;
mod logging;

use std::process::ExitCode;

use client_core::{EventListener, InviteEvent, RoomEvent, StopReason};
use client_matrix::Client;
use config::{TailAuth, TailConfig};
use tracing::{error, info, warn};

/// Prints each event as one line on stdout.
struct Printer {
    config: TailConfig,
}

impl EventListener for Printer {
    fn notify(&self, event: &RoomEvent) {
        if !self.config.wants_room(&event.room_id) {
            return;
        }
        println!("{}", render_event(event));
    }

    fn notify_invite(&self, invite: &InviteEvent) {
        if invite.event_type == "m.room.member" {
            println!("{} invited by {}", invite.room_id, invite.sender);
        }
    }
}

fn render_event(event: &RoomEvent) -> String {
    let ts = event
        .origin_server_ts
        .map(|ts| ts.to_string())
        .unwrap_or_else(|| "-".to_owned());
    if let Some(change) = event.member_change() {
        let name = change.display_name.as_deref().unwrap_or(&change.user_id);
        return format!(
            "{ts} {} {} membership={:?} by {}",
            event.room_id, name, change.membership, event.sender
        );
    }
    match event.body() {
        Some(body) => format!("{ts} {} <{}> {body}", event.room_id, event.sender),
        None => format!("{ts} {} {} from {}", event.room_id, event.event_type, event.sender),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match TailConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };

    let client = match Client::with_config(&config.homeserver, config.sync.clone()) {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to create client: {err}");
            return ExitCode::from(2);
        }
    };
    client.add_listener(Printer {
        config: config.clone(),
    });

    let login = match &config.auth {
        TailAuth::AccessToken(token) => client.login_token(token).await,
        TailAuth::Password { user, password } => client.login_password(user, password, None).await,
    };
    let credential = match login {
        Ok(credential) => credential,
        Err(err) => {
            error!(code = %err.code, "login failed: {}", err.message);
            return ExitCode::FAILURE;
        }
    };
    info!(user_id = %credential.user_id, homeserver = %config.homeserver, "following events; ctrl-c to quit");

    let mut status = client.subscribe_sync_status();
    let stopped = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        stopped = status.wait_for(|status| status.stop_reason.is_some()) => {
            stopped.ok().map(|status| status.clone())
        }
    };

    let exit = match stopped {
        None => {
            info!("interrupted");
            client.stop_sync().await;
            ExitCode::SUCCESS
        }
        Some(status) if status.stop_reason == Some(StopReason::Unrecoverable) => {
            let detail = status
                .last_error
                .map(|err| format!("{}: {}", err.code, err.message))
                .unwrap_or_default();
            error!("sync stopped: {detail}");
            ExitCode::FAILURE
        }
        Some(status) => {
            warn!(reason = ?status.stop_reason, "sync stopped");
            ExitCode::SUCCESS
        }
    };

    // A password login created a device for this run only.
    if matches!(config.auth, TailAuth::Password { .. })
        && client.is_logged_in()
        && let Err(err) = client.logout().await
    {
        warn!(code = %err.code, "logout failed: {}", err.message);
    }
    exit
}
