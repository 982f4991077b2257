//! Async driver for a [`Session`]

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::{EventSender, Intent, Session, SessionDevices, SessionEvent, SessionOptions};
use crate::error::{Result, SessionError};
use crate::protocol::{SessionSnapshot, SessionUpdate, StreamConfigUpdate};

/// Owns the session and applies its events in arrival order
pub struct SessionRunner {
    session: Session,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionRunner {
    pub fn new(options: SessionOptions, devices: SessionDevices) -> (Self, SessionHandle) {
        let (session, events) = Session::new(options, devices);
        let handle = SessionHandle {
            events: session.event_sender(),
            updates: session.updates.clone(),
            snapshot: session.watch_snapshot(),
        };
        (Self { session, events }, handle)
    }

    /// Run until a shutdown intent is handled
    ///
    /// Opening devices and encoding snapshots block the calling thread. On a
    /// multi-threaded runtime each event is handled inside `block_in_place`,
    /// so other tasks move off this worker meanwhile.
    pub async fn run(mut self) {
        let multi_thread = Handle::current().runtime_flavor() == RuntimeFlavor::MultiThread;
        tracing::debug!("Session loop started");
        while let Some(event) = self.events.recv().await {
            let keep_running = if multi_thread {
                tokio::task::block_in_place(|| self.session.handle(event))
            } else {
                self.session.handle(event)
            };
            if !keep_running {
                break;
            }
        }
        tracing::debug!("Session loop finished");
    }
}

/// Cloneable front end used by UI collaborators
#[derive(Clone)]
pub struct SessionHandle {
    events: EventSender,
    updates: broadcast::Sender<SessionUpdate>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    async fn request(&self, intent: Intent) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(SessionEvent::Intent {
                intent,
                reply: Some(reply),
            })
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn start_stream(&self) -> Result<()> {
        self.request(Intent::StartStream).await
    }

    pub async fn stop_stream(&self) -> Result<()> {
        self.request(Intent::StopStream).await
    }

    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.request(Intent::SendText(text.into())).await
    }

    pub async fn toggle_camera(&self) -> Result<()> {
        self.request(Intent::ToggleCamera).await
    }

    pub async fn update_config(&self, update: StreamConfigUpdate) -> Result<()> {
        self.request(Intent::UpdateConfig(update)).await
    }

    /// Release every device and end the session loop
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Intent::Shutdown).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }
}
