// ============================
// crates/backend-lib/src/room_actor.rs
// ============================
//! One task per room. All room state is owned by the actor and mutated only
//! while handling a mailbox message, so every transition is serialized.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use syncwatch_common::{ConnectionId, RoomId, ServerEvent};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::call::{CallCoordinator, CallEffects, TimerCommand};
use crate::config::Settings;
use crate::error::AppError;
use crate::messages::{Delivery, MemberInfo, RoomIntent, RoomMsg, RoomSnapshot, Target};
use crate::metrics::{SYNC_HARD, SYNC_SOFT};
use crate::playback::Playback;
use crate::room::RoomRegistry;
use crate::timer::ScheduledTask;

/// Room mailbox depth
pub const MAILBOX_CAPACITY: usize = 256;

/// A freshly created room nobody joined is dropped after this long
const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(30);

/// Cloneable handle that other components keep
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    generation: u64,
    sender: mpsc::Sender<RoomMsg>,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn join(
        &self,
        member: MemberInfo,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<RoomSnapshot, AppError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(RoomMsg::Join {
                member,
                outbox,
                respond_to,
            })
            .await?;
        response.await?
    }

    pub async fn leave(&self, connection_id: &str) {
        let msg = RoomMsg::Leave {
            connection_id: connection_id.to_string(),
        };
        if self.sender.send(msg).await.is_err() {
            debug!(target: "syncwatch.room", room_id = %self.room_id, "Leave after room closed");
        }
    }

    pub async fn intent(&self, connection_id: &str, intent: RoomIntent) -> Result<(), AppError> {
        self.sender
            .send(RoomMsg::Intent {
                connection_id: connection_id.to_string(),
                intent,
            })
            .await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<RoomSnapshot, AppError> {
        let (respond_to, response) = oneshot::channel();
        self.sender.send(RoomMsg::Snapshot { respond_to }).await?;
        Ok(response.await?)
    }
}

struct Member {
    info: MemberInfo,
    outbox: mpsc::Sender<ServerEvent>,
}

pub struct RoomActor {
    room_id: RoomId,
    generation: u64,
    settings: Arc<Settings>,
    registry: RoomRegistry,
    /// Own mailbox, for timers
    mailbox: mpsc::Sender<RoomMsg>,
    cancel: CancellationToken,
    members: HashMap<ConnectionId, Member>,
    /// Durable identity that created the room
    host_user_id: Option<String>,
    host_connection: Option<ConnectionId>,
    session_start: DateTime<Utc>,
    playback: Playback,
    call: CallCoordinator,
    resume_timer: Option<ScheduledTask>,
    recovery_timer: Option<ScheduledTask>,
    /// Members whose outbox closed while delivering
    dead: Vec<ConnectionId>,
}

impl RoomActor {
    /// Spawn the actor task and return its handle
    pub(crate) fn spawn(room_id: RoomId, generation: u64, registry: RoomRegistry) -> RoomHandle {
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        let settings = registry.settings();
        let actor = RoomActor {
            room_id: room_id.clone(),
            generation,
            call: CallCoordinator::new(settings.recovery_timeout()),
            cancel: registry.shutdown_token().child_token(),
            settings,
            registry,
            mailbox: sender.clone(),
            members: HashMap::new(),
            host_user_id: None,
            host_connection: None,
            session_start: Utc::now(),
            playback: Playback::new(Instant::now()),
            resume_timer: None,
            recovery_timer: None,
            dead: Vec::new(),
        };
        tokio::spawn(actor.run(receiver));
        RoomHandle {
            room_id,
            generation,
            sender,
        }
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<RoomMsg>) {
        info!(target: "syncwatch.room", room_id = %self.room_id, generation = self.generation, "Room opened");
        let cancel = self.cancel.clone();
        let grace = tokio::time::sleep(EMPTY_ROOM_GRACE);
        tokio::pin!(grace);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!(target: "syncwatch.room", room_id = %self.room_id, "Room stopped by shutdown");
                    break;
                },
                () = &mut grace, if self.host_user_id.is_none() => {
                    debug!(target: "syncwatch.room", room_id = %self.room_id, "Nobody joined, closing");
                    break;
                },
                msg = receiver.recv() => {
                    let Some(msg) = msg else { break };
                    self.handle(msg);
                    self.reap_dead();
                    if self.host_user_id.is_some() && self.members.is_empty() {
                        break;
                    }
                },
            }
        }

        self.close();
        // dropping the receiver fails any queued joins with RoomClosed
    }

    fn handle(&mut self, msg: RoomMsg) {
        match msg {
            RoomMsg::Join {
                member,
                outbox,
                respond_to,
            } => {
                let result = self.handle_join(member, outbox);
                let _ = respond_to.send(result);
            },
            RoomMsg::Leave { connection_id } => self.handle_leave(&connection_id),
            RoomMsg::Intent {
                connection_id,
                intent,
            } => self.handle_intent(&connection_id, intent),
            RoomMsg::HardSyncResume { sync_id } => self.handle_resume(sync_id),
            RoomMsg::RecoveryDeadline { generation } => {
                let effects = self.call.recovery_expired(generation);
                if !effects.is_empty() {
                    self.recovery_timer = None;
                }
                self.apply(effects);
            },
            RoomMsg::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot(None));
            },
        }
    }

    fn handle_join(
        &mut self,
        member: MemberInfo,
        outbox: mpsc::Sender<ServerEvent>,
    ) -> Result<RoomSnapshot, AppError> {
        let connection_id = member.connection_id.clone();
        let rejoining = self.members.contains_key(&connection_id);
        if !rejoining && self.members.len() >= self.settings.limits.max_members_per_room {
            warn!(target: "syncwatch.room", room_id = %self.room_id, %connection_id, "Room full");
            return Err(AppError::RoomFull);
        }

        let user_id = &member.identity.user_id;
        let host = self.host_user_id.get_or_insert_with(|| user_id.clone());
        if host == user_id {
            self.host_connection = Some(connection_id.clone());
        }

        let rebound = self.call.party_rejoined(&member);
        let name = member.display_name().to_string();
        self.members.insert(connection_id.clone(), Member { info: member, outbox });

        let snapshot = self.snapshot(Some(&connection_id));
        self.send_to(&connection_id, snapshot.to_event(self.settings.sync.tolerance_secs));
        if !rejoining {
            self.deliver(Delivery::all_except(
                connection_id.clone(),
                ServerEvent::SystemMessage {
                    message: format!("{name} joined your party 🎉"),
                },
            ));
            // the joiner already has the count in its room state
            let count = self.members.len();
            self.deliver(Delivery::all_except(
                connection_id.clone(),
                ServerEvent::UpdateUserCount { count },
            ));
        }
        self.apply(rebound);

        info!(
            target: "syncwatch.room",
            room_id = %self.room_id,
            %connection_id,
            members = self.members.len(),
            is_host = snapshot.is_host,
            "Member joined"
        );
        Ok(snapshot)
    }

    fn handle_leave(&mut self, connection_id: &str) {
        let Some(member) = self.members.remove(connection_id) else {
            return;
        };
        if self.host_connection.as_deref() == Some(connection_id) {
            self.host_connection = None;
        }

        let effects = self.call.party_disconnected(connection_id);
        self.apply(effects);

        info!(
            target: "syncwatch.room",
            room_id = %self.room_id,
            connection_id,
            members = self.members.len(),
            "Member left"
        );
        if !self.members.is_empty() {
            self.deliver(Delivery::all(ServerEvent::SystemMessage {
                message: format!("{} left the party", member.info.display_name()),
            }));
            self.broadcast_user_count();
        }
    }

    fn handle_intent(&mut self, connection_id: &str, intent: RoomIntent) {
        let Some(member) = self.members.get(connection_id).map(|m| m.info.clone()) else {
            debug!(target: "syncwatch.room", room_id = %self.room_id, connection_id, "Intent from non-member");
            return;
        };
        let now = Instant::now();

        match intent {
            RoomIntent::ChangeVideo { video_id } => {
                if self.host_connection.as_deref() != Some(connection_id) {
                    debug!(target: "syncwatch.room", room_id = %self.room_id, connection_id, "Video change from non-host");
                    self.send_to(connection_id, AppError::NotHost.to_event());
                    return;
                }
                let update = self.playback.change_video(video_id, now);
                self.resume_timer = None;
                self.deliver(Delivery::all(update));
            },
            RoomIntent::Sync {
                action,
                timestamp,
                is_playing,
            } => {
                let update = self.playback.apply_report(action, timestamp, is_playing, now);
                counter!(SYNC_SOFT).increment(1);
                self.deliver(Delivery::all_except(connection_id, ServerEvent::SyncUpdate(update)));
            },
            RoomIntent::HardSync {
                timestamp,
                video_id,
            } => {
                if video_id.is_some() && video_id.as_deref() != self.playback.video_id() {
                    debug!(
                        target: "syncwatch.room",
                        room_id = %self.room_id,
                        requested = ?video_id,
                        "Hard sync names another video, using the room's"
                    );
                }
                let prepare = self.playback.begin_hard_sync(timestamp, now);
                counter!(SYNC_HARD).increment(1);
                // replacing the timer cancels a superseded resume
                self.resume_timer = Some(ScheduledTask::schedule(
                    self.settings.hard_sync_settle(),
                    self.mailbox.clone(),
                    RoomMsg::HardSyncResume {
                        sync_id: prepare.sync_id,
                    },
                    &self.cancel,
                ));
                self.deliver(Delivery::all(ServerEvent::HardSyncPrepare(prepare)));
            },
            RoomIntent::RequestSync => {
                let event = self.playback.force_sync(now);
                self.send_to(connection_id, event);
            },
            RoomIntent::Chat { message } => {
                self.deliver(Delivery::all(ServerEvent::NewChat {
                    sender: member.display_name().to_string(),
                    message,
                    id: connection_id.to_string(),
                }));
            },
            RoomIntent::CallUser => {
                let effects = self.call.call_user(&member);
                self.apply(effects);
            },
            RoomIntent::CallAccepted { caller_id } => {
                let effects = self.call.accept(&member, &caller_id);
                self.apply(effects);
            },
            RoomIntent::CallRejected { caller_id } => {
                let effects = self.call.reject(&member, &caller_id);
                self.apply(effects);
            },
            RoomIntent::Signal(signal) => {
                let effects = self.call.relay(connection_id, signal);
                self.apply(effects);
            },
            RoomIntent::EndCall => {
                let effects = self.call.end(connection_id);
                self.apply(effects);
            },
            RoomIntent::Reconnect => {
                let effects = self.call.request_recovery(connection_id);
                self.apply(effects);
            },
            RoomIntent::MediaState(state) => {
                let effects = self.call.media_state(connection_id, state);
                self.apply(effects);
            },
        }
    }

    fn handle_resume(&mut self, sync_id: u64) {
        match self.playback.complete_hard_sync(sync_id, Instant::now()) {
            Some(resume) => {
                self.resume_timer = None;
                self.deliver(Delivery::all(ServerEvent::HardSyncResume(resume)));
            },
            None => {
                debug!(target: "syncwatch.room", room_id = %self.room_id, sync_id, "Stale hard-sync resume");
            },
        }
    }

    fn apply(&mut self, effects: CallEffects) {
        match effects.timer {
            Some(TimerCommand::ArmRecovery { generation, delay }) => {
                self.recovery_timer = Some(ScheduledTask::schedule(
                    delay,
                    self.mailbox.clone(),
                    RoomMsg::RecoveryDeadline { generation },
                    &self.cancel,
                ));
            },
            Some(TimerCommand::DisarmRecovery) => self.recovery_timer = None,
            None => {},
        }
        for delivery in effects.deliveries {
            self.deliver(delivery);
        }
    }

    fn send_to(&mut self, connection_id: &str, event: ServerEvent) {
        self.deliver(Delivery::to(connection_id, event));
    }

    fn broadcast_user_count(&mut self) {
        let count = self.members.len();
        self.deliver(Delivery::all(ServerEvent::UpdateUserCount { count }));
    }

    /// Non-blocking fan-out. Closed outboxes are queued for removal.
    fn deliver(&mut self, delivery: Delivery) {
        let Delivery { target, event } = delivery;
        let recipients: Vec<(&ConnectionId, &Member)> = match &target {
            Target::One(to) => self.members.get_key_value(to).into_iter().collect(),
            Target::AllExcept(skip) => self.members.iter().filter(|(id, _)| *id != skip).collect(),
            Target::All => self.members.iter().collect(),
        };

        for (connection_id, member) in recipients {
            match member.outbox.try_send(event.clone()) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    warn!(
                        target: "syncwatch.room",
                        room_id = %self.room_id,
                        %connection_id,
                        event = event.name(),
                        "Outbox full, dropping event"
                    );
                },
                Err(TrySendError::Closed(_)) => self.dead.push(connection_id.clone()),
            }
        }
    }

    fn reap_dead(&mut self) {
        while let Some(connection_id) = self.dead.pop() {
            debug!(target: "syncwatch.room", room_id = %self.room_id, %connection_id, "Pruning closed member");
            self.handle_leave(&connection_id);
        }
    }

    fn snapshot(&self, for_connection: Option<&str>) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            video_id: self.playback.video_id().map(str::to_owned),
            is_playing: self.playback.is_playing(),
            timestamp: self.playback.position_at(Instant::now()),
            session_start_time: self.session_start,
            member_count: self.members.len(),
            host_user_id: self.host_user_id.clone(),
            host_connection_id: self.host_connection.clone(),
            is_host: for_connection.is_some() && for_connection == self.host_connection.as_deref(),
            call: self.call.phase(),
        }
    }

    fn close(&mut self) {
        self.resume_timer = None;
        let effects = self.call.teardown();
        self.apply(effects);
        self.cancel.cancel();
        self.registry.release(&self.room_id, self.generation);
        info!(target: "syncwatch.room", room_id = %self.room_id, generation = self.generation, "Room closed");
    }
}
