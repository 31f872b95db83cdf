// ============================
// crates/backend-lib/src/call.rs
// ============================
//! One-to-one call coordination inside a room.
//!
//! The coordinator is a plain state machine. Every operation returns the
//! deliveries and timer commands the owning room actor must carry out, so
//! it can be exercised without sockets or a runtime.

use std::time::Duration;

use metrics::counter;
use syncwatch_common::{ConnectionId, ServerEvent};
use tracing::{debug, info};

use crate::messages::{CallPhase, Delivery, MemberInfo, Signal};
use crate::metrics::CALL_STARTED;

/// A participant in the call, bound to its current connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallParty {
    pub connection_id: ConnectionId,
    pub user_id: String,
    pub display_name: String,
}

impl From<&MemberInfo> for CallParty {
    fn from(member: &MemberInfo) -> Self {
        Self {
            connection_id: member.connection_id.clone(),
            user_id: member.identity.user_id.clone(),
            display_name: member.identity.display_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallState {
    Idle,
    Ringing {
        caller: CallParty,
    },
    Active {
        caller: CallParty,
        callee: CallParty,
    },
    Recovering {
        caller: CallParty,
        callee: CallParty,
        generation: u64,
    },
}

/// Timer work requested from the room actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    /// Replace any armed recovery deadline
    ArmRecovery { generation: u64, delay: Duration },
    DisarmRecovery,
}

/// Output of a coordinator operation
#[derive(Debug, Default, PartialEq)]
pub struct CallEffects {
    pub deliveries: Vec<Delivery>,
    pub timer: Option<TimerCommand>,
}

impl CallEffects {
    pub fn none() -> Self {
        Self::default()
    }

    pub(crate) fn deliver(mut self, delivery: Delivery) -> Self {
        self.deliveries.push(delivery);
        self
    }

    pub(crate) fn with_timer(mut self, timer: TimerCommand) -> Self {
        self.timer = Some(timer);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.timer.is_none()
    }
}

#[derive(Debug)]
pub struct CallCoordinator {
    pub(crate) state: CallState,
    pub(crate) recovery_timeout: Duration,
    pub(crate) last_generation: u64,
}

impl CallCoordinator {
    pub fn new(recovery_timeout: Duration) -> Self {
        Self {
            state: CallState::Idle,
            recovery_timeout,
            last_generation: 0,
        }
    }

    pub fn phase(&self) -> CallPhase {
        match self.state {
            CallState::Idle => CallPhase::Idle,
            CallState::Ringing { .. } => CallPhase::Ringing,
            CallState::Active { .. } => CallPhase::Active,
            CallState::Recovering { .. } => CallPhase::Recovering,
        }
    }

    /// The other party of an active or recovering call
    pub fn peer_of(&self, connection_id: &str) -> Option<&CallParty> {
        match &self.state {
            CallState::Active { caller, callee } | CallState::Recovering { caller, callee, .. } => {
                if caller.connection_id == connection_id {
                    Some(callee)
                } else if callee.connection_id == connection_id {
                    Some(caller)
                } else {
                    None
                }
            },
            _ => None,
        }
    }

    /// `call-user`: ring every other member
    pub fn call_user(&mut self, from: &MemberInfo) -> CallEffects {
        if !matches!(self.state, CallState::Idle) {
            debug!(target: "syncwatch.call", from = %from.connection_id, "Call already in progress, ignoring");
            return CallEffects::none();
        }
        let caller = CallParty::from(from);
        let effects = CallEffects::none().deliver(Delivery::all_except(
            caller.connection_id.clone(),
            ServerEvent::CallRequest {
                caller_id: caller.connection_id.clone(),
                caller_name: caller.display_name.clone(),
            },
        ));
        info!(target: "syncwatch.call", caller = %caller.connection_id, "Call ringing");
        self.state = CallState::Ringing { caller };
        effects
    }

    /// `call-accepted`: the first acceptance for the ringing caller wins
    pub fn accept(&mut self, from: &MemberInfo, caller_id: &str) -> CallEffects {
        let caller = match &self.state {
            CallState::Ringing { caller }
                if caller.connection_id == caller_id && caller.connection_id != from.connection_id =>
            {
                caller.clone()
            },
            _ => return CallEffects::none(),
        };
        let callee = CallParty::from(from);
        let effects = CallEffects::none().deliver(Delivery::to(
            caller.connection_id.clone(),
            ServerEvent::CallAccepted {
                accepter_id: callee.connection_id.clone(),
                accepter_name: callee.display_name.clone(),
            },
        ));
        counter!(CALL_STARTED).increment(1);
        info!(
            target: "syncwatch.call",
            caller = %caller.connection_id,
            callee = %callee.connection_id,
            "Call active"
        );
        self.state = CallState::Active { caller, callee };
        effects
    }

    /// `call-rejected`: any invited member's rejection ends the ringing
    pub fn reject(&mut self, from: &MemberInfo, caller_id: &str) -> CallEffects {
        match &self.state {
            CallState::Ringing { caller }
                if caller.connection_id == caller_id && caller.connection_id != from.connection_id =>
            {
                let effects = CallEffects::none().deliver(Delivery::to(
                    caller.connection_id.clone(),
                    ServerEvent::CallRejected {
                        rejecter_name: from.display_name().to_string(),
                    },
                ));
                self.state = CallState::Idle;
                effects
            },
            _ => CallEffects::none(),
        }
    }

    /// Relay negotiation payloads between the two parties only
    pub fn relay(&self, from: &str, signal: Signal) -> CallEffects {
        match self.peer_of(from) {
            Some(peer) => CallEffects::none()
                .deliver(Delivery::to(peer.connection_id.clone(), signal.into_event(from))),
            None => {
                debug!(target: "syncwatch.call", from, "Dropping signal outside a call");
                CallEffects::none()
            },
        }
    }

    /// `vc-end` from either party, or from the caller while ringing
    pub fn end(&mut self, from: &str) -> CallEffects {
        let end = ServerEvent::VcEnd {
            id: from.to_string(),
        };
        match &self.state {
            CallState::Ringing { caller } if caller.connection_id == from => {
                self.state = CallState::Idle;
                CallEffects::none().deliver(Delivery::all_except(from, end))
            },
            CallState::Active { .. } | CallState::Recovering { .. } => {
                let Some(peer) = self.peer_of(from).map(|p| p.connection_id.clone()) else {
                    return CallEffects::none();
                };
                let disarm = matches!(self.state, CallState::Recovering { .. });
                self.state = CallState::Idle;
                info!(target: "syncwatch.call", from, "Call ended");
                let effects = CallEffects::none().deliver(Delivery::to(peer, end));
                if disarm {
                    effects.with_timer(TimerCommand::DisarmRecovery)
                } else {
                    effects
                }
            },
            _ => CallEffects::none(),
        }
    }

    /// Room is going away
    pub fn teardown(&mut self) -> CallEffects {
        let disarm = matches!(self.state, CallState::Recovering { .. });
        self.state = CallState::Idle;
        if disarm {
            CallEffects::none().with_timer(TimerCommand::DisarmRecovery)
        } else {
            CallEffects::none()
        }
    }
}
