//! Background `/sync` loop and listener fan-out.

use std::sync::Arc;

use client_core::{
    ClientError, CredentialSource, EventListener, ListenerHandle, ListenerRegistry, StopReason,
    SyncBatch, SyncConfig, SyncPhase, SyncStateMachine, SyncStatus, SyncTrigger,
};
use parking_lot::{Mutex as SyncMutex, RwLock};
use tokio::{
    sync::{Mutex, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    paths,
    transport::{ApiRequest, Transport, TransportError},
};

#[derive(Debug)]
struct RunningSyncTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

struct EngineShared {
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialSource>,
    config: SyncConfig,
    listeners: ListenerRegistry,
    /// Resume token. Written only by the loop, after a batch is fully dispatched.
    since: RwLock<Option<String>>,
    status: watch::Sender<SyncStatus>,
}

/// Owns the long-poll loop and the listener registry.
///
/// At most one loop runs per engine. Listeners may be added or removed from
/// any thread, including from inside a callback.
pub struct SyncEngine {
    shared: Arc<EngineShared>,
    sync_task: Mutex<Option<RunningSyncTask>>,
    stop_signal: SyncMutex<Option<CancellationToken>>,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialSource>,
        config: SyncConfig,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            shared: Arc::new(EngineShared {
                transport,
                credentials,
                config,
                listeners: ListenerRegistry::new(),
                since: RwLock::new(None),
                status,
            }),
            sync_task: Mutex::new(None),
            stop_signal: SyncMutex::new(None),
        }
    }

    /// Spawn the loop. Returns `false` when one is already running.
    ///
    /// A loop that was told to stop but has not exited yet does not count as
    /// running; it is joined and a fresh one takes its place.
    pub async fn start(&self) -> bool {
        let mut guard = self.sync_task.lock().await;
        if guard.as_ref().is_some_and(|running| self.is_active(running)) {
            debug!("sync loop already running");
            return false;
        }
        if let Some(previous) = guard.take() {
            previous.stop.cancel();
            if let Err(err) = previous.task.await
                && err.is_panic()
            {
                error!("previous sync loop panicked");
            }
        }

        let stop = CancellationToken::new();
        self.shared.status.send_modify(|status| {
            status.phase = SyncPhase::Polling;
            status.lag_hint_ms = None;
            status.stop_reason = None;
            status.last_error = None;
        });

        let sync_loop = SyncLoop {
            shared: Arc::clone(&self.shared),
            stop: stop.child_token(),
            machine: SyncStateMachine::default(),
            attempt: 0,
        };
        let task = tokio::spawn(sync_loop.run());

        *self.stop_signal.lock() = Some(stop.clone());
        *guard = Some(RunningSyncTask { stop, task });
        info!(since = ?self.since(), "sync loop started");
        true
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// Once this returns no listener will be invoked again by the stopped loop,
    /// and a response that was in flight has been discarded. Returns `false`
    /// when no loop had been started.
    pub async fn stop(&self) -> bool {
        let running = {
            let mut guard = self.sync_task.lock().await;
            guard.take()
        };
        self.stop_signal.lock().take();

        let Some(running) = running else {
            return false;
        };

        running.stop.cancel();
        if let Err(err) = running.task.await
            && err.is_panic()
        {
            error!("sync loop panicked");
        }
        true
    }

    /// Stop the loop and forget the resume token, so the next start begins
    /// with an initial sync. For when the session changes hands.
    pub async fn reset(&self) -> bool {
        let stopped = self.stop().await;
        if self.shared.since.write().take().is_some() {
            debug!("resume token discarded");
        }
        stopped
    }

    fn is_active(&self, running: &RunningSyncTask) -> bool {
        !running.task.is_finished()
            && !running.stop.is_cancelled()
            && self.shared.status.borrow().stop_reason.is_none()
    }

    /// Signal the loop to stop without waiting. Safe to call from a listener.
    pub fn request_stop(&self) {
        if let Some(stop) = self.stop_signal.lock().as_ref() {
            stop.cancel();
        }
    }

    pub fn add_listener(&self, listener: impl EventListener + 'static) -> ListenerHandle {
        self.shared.listeners.add(listener)
    }

    pub fn add_shared_listener(&self, listener: Arc<dyn EventListener>) -> ListenerHandle {
        self.shared.listeners.add_shared(listener)
    }

    /// Remove a listener. Blocks while that listener's callback is running on
    /// another thread, so after this returns it will not be invoked again.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        self.shared.listeners.remove(handle)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    pub fn status(&self) -> SyncStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    /// Failure that stopped the loop, or the latest recoverable failure while backing off.
    pub fn last_error(&self) -> Option<ClientError> {
        self.shared.status.borrow().last_error.clone()
    }

    /// Resume token the next poll will present.
    pub fn since(&self) -> Option<String> {
        self.shared.since.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.status.borrow().running()
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_signal.get_mut().take() {
            stop.cancel();
        }
    }
}

struct SyncLoop {
    shared: Arc<EngineShared>,
    stop: CancellationToken,
    machine: SyncStateMachine,
    attempt: u32,
}

impl SyncLoop {
    async fn run(mut self) {
        self.transition(SyncTrigger::Start);
        let reason = self.poll_until_stopped().await;
        self.finish(reason);
    }

    async fn poll_until_stopped(&mut self) -> StopReason {
        loop {
            if self.stop.is_cancelled() {
                return StopReason::Requested;
            }
            if self.shared.credentials.current_token().is_none() {
                info!("no credential available; suspending sync");
                return StopReason::CredentialsCleared;
            }

            let since = self.shared.since.read().clone();
            let request = ApiRequest::get(paths::sync())
                .with_query(self.shared.config.query(since.as_deref()))
                .with_timeout(self.shared.config.request_timeout());
            debug!(since = since.as_deref().unwrap_or("<initial>"), "polling /sync");

            let outcome = tokio::select! {
                biased;
                _ = self.stop.cancelled() => return StopReason::Requested,
                outcome = self.shared.transport.request(request) => outcome,
            };

            // A response that lands after stop or logout is dropped whole.
            if self.stop.is_cancelled() {
                return StopReason::Requested;
            }
            if self.shared.credentials.current_token().is_none() {
                info!("credential cleared during poll; discarding response");
                return StopReason::CredentialsCleared;
            }

            let parsed = match outcome {
                Ok(body) => SyncBatch::parse(&body),
                Err(TransportError::MissingCredential) => return StopReason::CredentialsCleared,
                Err(err) => Err(ClientError::from(err)),
            };

            match parsed {
                Ok(batch) => self.dispatch(batch),
                Err(err) if err.is_recoverable() => {
                    if !self.back_off(err).await {
                        return StopReason::Requested;
                    }
                }
                Err(err) => {
                    error!(code = %err.code, message = %err.message, "sync failed; stopping");
                    self.shared
                        .status
                        .send_modify(|status| status.last_error = Some(err));
                    return StopReason::Unrecoverable;
                }
            }
        }
    }

    fn dispatch(&mut self, batch: SyncBatch) {
        self.transition(SyncTrigger::ResponseReceived);
        self.attempt = 0;

        let listeners = self.shared.listeners.snapshot();
        for room in &batch.rooms {
            for event in &room.events {
                listeners.deliver(event);
            }
        }
        for invite in &batch.invites {
            for event in &invite.events {
                listeners.deliver_invite(event);
            }
        }

        *self.shared.since.write() = Some(batch.next_batch.clone());
        self.shared.status.send_modify(|status| {
            status.last_error = None;
            status.lag_hint_ms = None;
        });
        self.transition(SyncTrigger::DispatchComplete);

        debug!(
            next_batch = %batch.next_batch,
            events = batch.event_count(),
            skipped = batch.skipped.len(),
            listeners = listeners.len(),
            "sync batch dispatched"
        );
    }

    /// Sleep before the next attempt. `false` when stop was requested meanwhile.
    async fn back_off(&mut self, err: ClientError) -> bool {
        let delay = self
            .shared
            .config
            .retry
            .delay_for_attempt(self.attempt, err.retry_after_ms);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.attempt = self.attempt.saturating_add(1);
        warn!(
            code = %err.code,
            message = %err.message,
            attempt = self.attempt,
            delay_ms,
            "sync request failed; backing off"
        );

        self.transition(SyncTrigger::RequestFailed);
        self.shared.status.send_modify(|status| {
            status.lag_hint_ms = Some(delay_ms);
            status.last_error = Some(err);
        });

        tokio::select! {
            _ = self.stop.cancelled() => return false,
            _ = tokio::time::sleep(delay) => {}
        }
        self.transition(SyncTrigger::BackoffElapsed);
        true
    }

    fn transition(&mut self, trigger: SyncTrigger) {
        match self.machine.apply(trigger) {
            Ok(phase) => self.shared.status.send_modify(|status| status.phase = phase),
            Err(err) => error!(code = %err.code, message = %err.message, "sync state machine rejected trigger"),
        }
    }

    fn finish(&mut self, reason: StopReason) {
        self.transition(SyncTrigger::Stop);
        self.shared.status.send_modify(|status| {
            status.lag_hint_ms = None;
            status.stop_reason = Some(reason);
            if reason != StopReason::Unrecoverable {
                status.last_error = None;
            }
        });
        info!(?reason, "sync loop stopped");
    }
}

