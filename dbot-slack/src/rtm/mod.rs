//! RTM connection manager.
//!
//! [`RtmConnection`] bootstraps a session with `rtm.start`, then [`RtmConnection::run`] drives
//! it on its own [`EventLoop`] until the transport closes or [`RtmHandle::shut_down`] is called.
//! Transport events are consumed in order by a single pump task on the loop thread; outbound
//! writes and inbound handler calls go through the loop's FIFO queue.

mod state;

pub use state::ConnectionState;

use std::sync::{Arc, Mutex, PoisonError};

use dbot_core::{
    CloseEvent, DbotError, EventLoop, InMemoryRoster, LoopHandle, MessageHandler, Result,
    RobotIdentity, RoomCreator, UserCreator,
};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::api::{Directory, SlackApi, TeamSnapshot};
use crate::config::{ErrorPolicy, SlackConfig};
use crate::im_mapping::ImMapping;
use crate::inbound::InboundDispatcher;
use crate::outbound::OutboundSender;
use crate::transport::{
    Frame, OpenRequest, Transport, TransportEvent, TransportLink, WebSocketTransport,
};
use state::SessionState;

/// Close code recorded when the transport goes away without reporting a close.
const LOST_CLOSE: u16 = 1006;

/// Callback run on the loop thread right after the session opens.
pub type OnOpen = Box<dyn FnOnce(&RtmHandle) + Send + 'static>;

/// The collaborators a session hands its data to.
#[derive(Clone)]
pub struct Collaborators {
    pub handler: Arc<dyn MessageHandler>,
    pub user_creator: Arc<dyn UserCreator>,
    pub room_creator: Arc<dyn RoomCreator>,
}

impl Collaborators {
    pub fn new(
        handler: Arc<dyn MessageHandler>,
        user_creator: Arc<dyn UserCreator>,
        room_creator: Arc<dyn RoomCreator>,
    ) -> Self {
        Self {
            handler,
            user_creator,
            room_creator,
        }
    }

    /// Uses `roster` as both the user and the room creator.
    pub fn with_roster(handler: Arc<dyn MessageHandler>, roster: Arc<InMemoryRoster>) -> Self {
        Self {
            handler,
            user_creator: roster.clone(),
            room_creator: roster,
        }
    }
}

struct Shared {
    state: SessionState,
    snapshot: Arc<TeamSnapshot>,
    im_mapping: ImMapping,
    loop_handle: LoopHandle,
    outbound: OutboundSender,
    frames: mpsc::UnboundedSender<Frame>,
}

/// Cloneable, thread-safe access to a connection. Handed to the `on_open` hook.
#[derive(Clone)]
pub struct RtmHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for RtmHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmHandle")
            .field("robot", &self.shared.snapshot.robot.id)
            .field("state", &self.state())
            .finish()
    }
}

impl RtmHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state.current()
    }

    pub fn close_event(&self) -> Option<CloseEvent> {
        self.shared.state.close_event()
    }

    pub fn robot(&self) -> &RobotIdentity {
        &self.shared.snapshot.robot
    }

    /// Queues one message frame per text to `channel`, in order.
    ///
    /// Every text is checked against the payload limit before anything is queued. Once the
    /// session has closed this fails with [`DbotError::Closed`].
    pub fn send_messages<S: AsRef<str>>(&self, channel: &str, texts: &[S]) -> Result<usize> {
        self.shared
            .outbound
            .send_all(channel, texts)
            .map_err(|e| match (e, self.close_event()) {
                (DbotError::LoopClosed, Some(close)) => DbotError::Closed(close),
                (e, _) => e,
            })
    }

    /// Closes the session if it is open and asks the loop to stop.
    ///
    /// During the handshake this only marks the session `Closing`; the close frame is written
    /// as soon as the transport reports open, and the hook and roster are skipped. Idempotent.
    /// Before `run`, and after the transport has closed, this changes nothing.
    pub fn shut_down(&self) {
        let shared = &self.shared;
        if !shared.loop_handle.is_running() {
            return;
        }
        match shared.state.begin_closing() {
            Some(ConnectionState::Connecting) => {
                info!(
                    robot_id = %shared.snapshot.robot.id,
                    "rtm: shutdown requested during handshake"
                );
            }
            Some(_) => {
                info!(robot_id = %shared.snapshot.robot.id, "rtm: shutting down");
                self.queue_close();
            }
            None => {}
        }
        shared.loop_handle.safe_stop();
    }

    /// Queues the close frame behind pending writes so they reach the wire first.
    fn queue_close(&self) {
        let frames = self.shared.frames.clone();
        if self.shared.loop_handle.defer(move || send_close(&frames)).is_err() {
            // Stopped and drained: nothing is left ahead of the close frame.
            send_close(&self.shared.frames);
        }
    }

    /// Resolves the direct-message channel for `user_id`; `None` if the user has none.
    ///
    /// May call `im.open`, so it must be awaited inside a tokio runtime (the hook and the
    /// message handler already are).
    pub async fn im_for(&self, user_id: &str) -> Result<Option<String>> {
        self.shared.im_mapping.im_for(user_id).await
    }
}

fn send_close(frames: &mpsc::UnboundedSender<Frame>) {
    if frames.send(Frame::Close).is_err() {
        debug!("rtm: transport already gone, close frame not sent");
    }
}

/// A bootstrapped RTM session.
pub struct RtmConnection {
    config: SlackConfig,
    collaborators: Collaborators,
    transport: Arc<dyn Transport>,
    event_loop: EventLoop,
    frames: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    handle: RtmHandle,
}

impl std::fmt::Debug for RtmConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtmConnection")
            .field("config", &self.config)
            .field("handle", &self.handle)
            .finish()
    }
}

impl RtmConnection {
    /// Calls `rtm.start` and assembles a connection for the returned session.
    ///
    /// Blocks the calling thread for the bootstrap request; call it outside any tokio runtime.
    /// Any failure of the request, `ok: false`, or a malformed response is a
    /// [`DbotError::Bootstrap`].
    #[instrument(skip_all)]
    pub fn build(config: SlackConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let api = Arc::new(SlackApi::from_config(&config)?);
        let event_loop = EventLoop::with_shutdown_grace(config.shutdown_grace)?;
        let snapshot = event_loop.block_on(api.rtm_start())?;
        Ok(Self::assemble(
            config,
            snapshot,
            collaborators,
            api,
            Arc::new(WebSocketTransport::new()),
            event_loop,
        ))
    }

    /// Assembles a connection from an already fetched snapshot with explicit directory and
    /// transport.
    pub fn from_snapshot(
        config: SlackConfig,
        snapshot: TeamSnapshot,
        collaborators: Collaborators,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let event_loop = EventLoop::with_shutdown_grace(config.shutdown_grace)?;
        Ok(Self::assemble(
            config,
            snapshot,
            collaborators,
            directory,
            transport,
            event_loop,
        ))
    }

    fn assemble(
        config: SlackConfig,
        snapshot: TeamSnapshot,
        collaborators: Collaborators,
        directory: Arc<dyn Directory>,
        transport: Arc<dyn Transport>,
        event_loop: EventLoop,
    ) -> Self {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let loop_handle = event_loop.handle();
        let im_mapping = ImMapping::new(directory, &snapshot.ims);
        let shared = Shared {
            state: SessionState::new(),
            snapshot: Arc::new(snapshot),
            im_mapping,
            outbound: OutboundSender::new(loop_handle.clone(), frames_tx.clone()),
            loop_handle,
            frames: frames_tx,
        };
        Self {
            config,
            collaborators,
            transport,
            event_loop,
            frames: Mutex::new(Some(frames_rx)),
            handle: RtmHandle {
                shared: Arc::new(shared),
            },
        }
    }

    /// Opens the streaming session and blocks until it ends.
    ///
    /// `on_open` runs on the loop thread once the handshake completes, before the roster is
    /// materialized. Returns after the loop has stopped; the state is then always
    /// [`ConnectionState::Closed`]. A connection runs once: a second call fails with
    /// [`DbotError::LoopConsumed`].
    #[instrument(skip_all, fields(robot = %self.handle.robot().name))]
    pub fn run(&self, on_open: Option<OnOpen>) -> Result<()> {
        let frames = self
            .frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DbotError::LoopConsumed)?;

        let shared = Arc::clone(&self.handle.shared);
        let request = OpenRequest::new(
            shared.snapshot.websocket_url.clone(),
            &self.config.transport,
            self.config.proxy.as_deref(),
        );
        shared.state.transition(ConnectionState::Connecting);
        info!(url = %request.url, proxy = ?request.proxy, "rtm: connecting");

        let pump = Pump {
            handle: self.handle.clone(),
            collaborators: self.collaborators.clone(),
            error_policy: self.config.error_policy,
            on_open,
        };
        let transport = Arc::clone(&self.transport);
        let result = self.event_loop.run(move |loop_handle| async move {
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            loop_handle.spawn(async move {
                transport
                    .open(
                        request,
                        TransportLink {
                            events: events_tx,
                            frames,
                        },
                    )
                    .await;
            });
            pump.run(loop_handle, events_rx).await;
        });

        shared.state.finish();
        match shared.state.close_event() {
            Some(close) => info!(close = %close, "rtm: session ended"),
            None => info!("rtm: session ended without a close event"),
        }
        result
    }

    pub fn send_messages<S: AsRef<str>>(&self, channel: &str, texts: &[S]) -> Result<usize> {
        self.handle.send_messages(channel, texts)
    }

    pub fn shut_down(&self) {
        self.handle.shut_down()
    }

    pub async fn im_for(&self, user_id: &str) -> Result<Option<String>> {
        self.handle.im_for(user_id).await
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    pub fn close_event(&self) -> Option<CloseEvent> {
        self.handle.close_event()
    }

    pub fn snapshot(&self) -> &TeamSnapshot {
        &self.handle.shared.snapshot
    }

    pub fn robot(&self) -> &RobotIdentity {
        self.handle.robot()
    }

    pub fn handle(&self) -> RtmHandle {
        self.handle.clone()
    }
}

/// Consumes transport events in order on the loop thread.
struct Pump {
    handle: RtmHandle,
    collaborators: Collaborators,
    error_policy: ErrorPolicy,
    on_open: Option<OnOpen>,
}

impl Pump {
    async fn run(
        mut self,
        loop_handle: LoopHandle,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let shared = Arc::clone(&self.handle.shared);
        let inbound = InboundDispatcher::new(
            loop_handle.clone(),
            Arc::clone(&self.collaborators.handler),
            shared.snapshot.robot.clone(),
        );
        let mut watchdog_armed = false;

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Open => {
                    let opened = shared.state.current() != ConnectionState::Closing
                        && shared.state.transition(ConnectionState::Open);
                    if !opened {
                        if shared.state.current() == ConnectionState::Closing {
                            info!("rtm: opened after shutdown was requested, closing");
                            self.handle.queue_close();
                        }
                        continue;
                    }
                    info!(robot_id = %shared.snapshot.robot.id, "rtm: connected");
                    if let Some(hook) = self.on_open.take() {
                        hook(&self.handle);
                    }
                    self.materialize(&loop_handle);
                }
                TransportEvent::Message(raw) => {
                    if let Err(e) = inbound.on_message(&raw) {
                        warn!(error = %e, bytes = raw.len(), "rtm: dropping inbound frame");
                    }
                }
                TransportEvent::Close(close) => {
                    info!(close = %close, "rtm: transport closed");
                    shared.state.record_close(close);
                    loop_handle.safe_stop();
                    return;
                }
                TransportEvent::Error(message) => {
                    warn!(error = %message, state = %shared.state.current(), "rtm: transport error");
                    if let ErrorPolicy::CloseAfter(grace) = self.error_policy {
                        if !watchdog_armed {
                            watchdog_armed = true;
                            self.arm_watchdog(grace);
                        }
                    }
                }
            }
        }

        warn!("rtm: transport ended without a close event");
        shared
            .state
            .record_close(CloseEvent::new(LOST_CLOSE, "transport ended without close"));
        loop_handle.safe_stop();
    }

    /// Hands the snapshot's users and channels to the creators. Fire-and-forget: failures are
    /// logged.
    fn materialize(&self, loop_handle: &LoopHandle) {
        let snapshot = Arc::clone(&self.handle.shared.snapshot);
        let user_creator = Arc::clone(&self.collaborators.user_creator);
        loop_handle.spawn(async move {
            if let Err(e) = user_creator
                .create_users(&snapshot.users, &snapshot.robot)
                .await
            {
                warn!(error = %e, "rtm: create_users failed");
            }
        });

        let snapshot = Arc::clone(&self.handle.shared.snapshot);
        let room_creator = Arc::clone(&self.collaborators.room_creator);
        loop_handle.spawn(async move {
            if let Err(e) = room_creator.create_rooms(&snapshot.channels).await {
                warn!(error = %e, "rtm: create_rooms failed");
            }
        });
    }

    /// Shuts the session down if no close event follows an error within `grace`. Not tracked
    /// by the loop, so it never holds up a stop.
    fn arm_watchdog(&self, grace: std::time::Duration) {
        let handle = self.handle.clone();
        debug!(grace_ms = grace.as_millis() as u64, "rtm: error watchdog armed");
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if !handle.state().is_terminal() {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "rtm: no close after transport error, shutting down"
                );
                handle.shut_down();
            }
        });
    }
}
