//! Shared setup for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use backend_lib::auth::{Identity, TrustedQueryIdentity};
use backend_lib::config::{RateLimitSettings, Settings, SettingsBuilder};
use backend_lib::websocket::{ConnectionHandler, EventOutcome};
use backend_lib::AppState;
use syncwatch_common::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

/// Longest a test waits for one event
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings with generous control allowances so flows are not rate limited
pub fn settings() -> SettingsBuilder {
    Settings::builder().rate_limits(RateLimitSettings {
        control: 50,
        ..RateLimitSettings::default()
    })
}

pub fn state_with(builder: SettingsBuilder) -> Arc<AppState> {
    let settings = builder.build().expect("valid test settings");
    Arc::new(AppState::new(settings, Arc::new(TrustedQueryIdentity::new())).expect("app state"))
}

pub fn state() -> Arc<AppState> {
    state_with(settings())
}

/// One simulated participant: the connection handler plus its outbox
pub struct Client {
    pub handler: ConnectionHandler,
    pub rx: mpsc::Receiver<ServerEvent>,
}

impl Client {
    pub fn connect(state: &Arc<AppState>, user_id: &str, name: &str) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let identity = Identity {
            user_id: user_id.to_string(),
            display_name: name.to_string(),
        };
        Self {
            handler: ConnectionHandler::new(Arc::clone(state), identity, tx),
            rx,
        }
    }

    pub fn id(&self) -> String {
        self.handler.connection_id().to_string()
    }

    pub async fn send(&mut self, event: ClientEvent) -> EventOutcome {
        self.handler.handle_event(event).await
    }

    pub async fn join(&mut self, room_id: &str) -> EventOutcome {
        self.send(ClientEvent::Join {
            room_id: room_id.to_string(),
        })
        .await
    }

    /// Next event, failing the test after [`EVENT_TIMEOUT`]
    pub async fn next(&mut self) -> ServerEvent {
        tokio::time::timeout(EVENT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("outbox closed")
    }

    /// Skip events until one matches
    pub async fn next_matching<F>(&mut self, mut pred: F) -> ServerEvent
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        loop {
            let event = self.next().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Everything received within `window`
    pub async fn drain_for(&mut self, window: Duration) -> Vec<ServerEvent> {
        let deadline = tokio::time::Instant::now() + window;
        let mut events = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            events.push(event);
        }
        events
    }

    pub async fn disconnect(self) {
        self.handler.disconnect().await;
    }
}
