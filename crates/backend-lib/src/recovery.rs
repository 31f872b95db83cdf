// ============================
// crates/backend-lib/src/recovery.rs
// ============================
//! Reconnection supervision for an active call.
//!
//! A party that loses its media or transport moves the call into
//! `Recovering` and arms one deadline. Only the first trigger arms it;
//! later triggers inside the window are relayed but never re-arm. The
//! deadline is identified by a generation so a stale timer that fires after
//! recovery or teardown is ignored.

use metrics::counter;
use syncwatch_common::{MediaConnectionState, ServerEvent};
use tracing::{info, warn};

use crate::call::{CallCoordinator, CallEffects, CallState, TimerCommand};
use crate::messages::{Delivery, MemberInfo};
use crate::metrics::{CALL_RECOVERED, CALL_RECOVERY_TIMEOUT};

impl CallCoordinator {
    pub fn is_recovering(&self) -> bool {
        matches!(self.state, CallState::Recovering { .. })
    }

    fn enter_recovery(&mut self, from: &str) -> CallEffects {
        let (caller, callee) = match &self.state {
            CallState::Active { caller, callee } => (caller.clone(), callee.clone()),
            _ => return CallEffects::none(),
        };
        self.last_generation += 1;
        let generation = self.last_generation;
        info!(
            target: "syncwatch.call",
            from,
            generation,
            timeout_secs = self.recovery_timeout.as_secs(),
            "Call entering recovery"
        );
        self.state = CallState::Recovering {
            caller,
            callee,
            generation,
        };
        CallEffects::none().with_timer(TimerCommand::ArmRecovery {
            generation,
            delay: self.recovery_timeout,
        })
    }

    /// `vc-reconnect` from a party
    pub fn request_recovery(&mut self, from: &str) -> CallEffects {
        let Some(peer) = self.peer_of(from).map(|p| p.connection_id.clone()) else {
            return CallEffects::none();
        };
        let relay = Delivery::to(
            peer,
            ServerEvent::VcReconnect {
                id: from.to_string(),
            },
        );
        // inside the window: relay, keep the first deadline
        let effects = if self.is_recovering() {
            CallEffects::none()
        } else {
            self.enter_recovery(from)
        };
        effects.deliver(relay)
    }

    /// `vc-connection-state` reported by a party's client
    pub fn media_state(&mut self, from: &str, state: MediaConnectionState) -> CallEffects {
        if self.peer_of(from).is_none() {
            return CallEffects::none();
        }
        match state {
            MediaConnectionState::Connected => self.recovered(),
            MediaConnectionState::Disconnected | MediaConnectionState::Failed => {
                if self.is_recovering() {
                    CallEffects::none()
                } else {
                    self.request_recovery(from)
                }
            },
        }
    }

    fn recovered(&mut self) -> CallEffects {
        let (caller, callee) = match &self.state {
            CallState::Recovering { caller, callee, .. } => (caller.clone(), callee.clone()),
            _ => return CallEffects::none(),
        };
        counter!(CALL_RECOVERED).increment(1);
        info!(target: "syncwatch.call", "Call recovered");
        let effects = CallEffects::none()
            .deliver(Delivery::to(caller.connection_id.clone(), ServerEvent::VcRecovered))
            .deliver(Delivery::to(callee.connection_id.clone(), ServerEvent::VcRecovered))
            .with_timer(TimerCommand::DisarmRecovery);
        self.state = CallState::Active { caller, callee };
        effects
    }

    /// Transport loss of a member.
    ///
    /// A ringing caller cancels the call, an active party starts recovery,
    /// and a party already recovering changes nothing.
    pub fn party_disconnected(&mut self, connection_id: &str) -> CallEffects {
        match &self.state {
            CallState::Ringing { caller } if caller.connection_id == connection_id => {
                self.state = CallState::Idle;
                CallEffects::none().deliver(Delivery::all_except(
                    connection_id,
                    ServerEvent::VcEnd {
                        id: connection_id.to_string(),
                    },
                ))
            },
            CallState::Active { .. } if self.peer_of(connection_id).is_some() => {
                self.request_recovery(connection_id)
            },
            _ => CallEffects::none(),
        }
    }

    /// A member joined. If its identity is a call party on another
    /// connection, the call moves to the new connection and the old one no
    /// longer counts as a party, so its late `leave` changes nothing.
    ///
    /// The media session of an active call died with the old connection, so
    /// the call enters recovery and the peer renegotiates with the new id.
    pub fn party_rejoined(&mut self, member: &MemberInfo) -> CallEffects {
        let (caller, callee) = match &mut self.state {
            CallState::Active { caller, callee } | CallState::Recovering { caller, callee, .. } => {
                (caller, callee)
            },
            _ => return CallEffects::none(),
        };
        let (rejoined, peer) = if caller.user_id == member.identity.user_id {
            (caller, callee)
        } else if callee.user_id == member.identity.user_id {
            (callee, caller)
        } else {
            return CallEffects::none();
        };
        if rejoined.connection_id == member.connection_id {
            return CallEffects::none();
        }
        info!(
            target: "syncwatch.call",
            old = %rejoined.connection_id,
            new = %member.connection_id,
            "Call party rejoined under a new connection"
        );
        rejoined.connection_id = member.connection_id.clone();
        let relay = Delivery::to(
            peer.connection_id.clone(),
            ServerEvent::VcReconnect {
                id: member.connection_id.clone(),
            },
        );

        let effects = if self.is_recovering() {
            CallEffects::none()
        } else {
            self.enter_recovery(&member.connection_id)
        };
        effects.deliver(relay)
    }

    /// Deadline fired. Only the armed generation ends the call.
    pub fn recovery_expired(&mut self, generation: u64) -> CallEffects {
        let (caller, callee) = match &self.state {
            CallState::Recovering {
                caller,
                callee,
                generation: armed,
            } if *armed == generation => (caller.clone(), callee.clone()),
            _ => return CallEffects::none(),
        };
        counter!(CALL_RECOVERY_TIMEOUT).increment(1);
        warn!(target: "syncwatch.call", generation, "Call recovery timed out");
        self.state = CallState::Idle;
        CallEffects::none()
            .deliver(Delivery::to(caller.connection_id, ServerEvent::VcRecoveryTimeout))
            .deliver(Delivery::to(callee.connection_id, ServerEvent::VcRecoveryTimeout))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::call::tests::{active_call, member};
    use crate::messages::CallPhase;

    fn armed_generation(effects: &CallEffects) -> u64 {
        match effects.timer {
            Some(TimerCommand::ArmRecovery { generation, delay }) => {
                assert_eq!(delay, Duration::from_secs(120));
                generation
            },
            other => panic!("expected armed timer, got {other:?}"),
        }
    }

    #[test]
    fn test_reconnect_arms_once_and_relays() {
        let (mut call, _, _) = active_call();
        let first = call.request_recovery("conn-a");
        armed_generation(&first);
        assert_eq!(
            first.deliveries,
            vec![Delivery::to(
                "conn-b",
                ServerEvent::VcReconnect {
                    id: "conn-a".to_string(),
                }
            )]
        );
        assert!(call.is_recovering());

        // repeated triggers inside the window do not re-arm
        let second = call.request_recovery("conn-b");
        assert_eq!(second.timer, None);
        assert_eq!(second.deliveries.len(), 1);
        let third = call.media_state("conn-a", MediaConnectionState::Failed);
        assert!(third.is_empty());
    }

    #[test]
    fn test_connected_report_recovers() {
        let (mut call, _, _) = active_call();
        call.media_state("conn-b", MediaConnectionState::Disconnected);
        assert!(call.is_recovering());

        let effects = call.media_state("conn-a", MediaConnectionState::Connected);
        assert_eq!(effects.timer, Some(TimerCommand::DisarmRecovery));
        assert_eq!(
            effects.deliveries,
            vec![
                Delivery::to("conn-a", ServerEvent::VcRecovered),
                Delivery::to("conn-b", ServerEvent::VcRecovered),
            ]
        );
        assert_eq!(call.phase(), CallPhase::Active);

        // connected while already active is a no-op
        assert!(call.media_state("conn-a", MediaConnectionState::Connected).is_empty());
    }

    #[test]
    fn test_expiry_notifies_both_parties_exactly_once() {
        let (mut call, _, _) = active_call();
        let generation = armed_generation(&call.party_disconnected("conn-a"));

        let effects = call.recovery_expired(generation);
        assert_eq!(
            effects.deliveries,
            vec![
                Delivery::to("conn-a", ServerEvent::VcRecoveryTimeout),
                Delivery::to("conn-b", ServerEvent::VcRecoveryTimeout),
            ]
        );
        assert_eq!(call.phase(), CallPhase::Idle);
        assert!(call.recovery_expired(generation).is_empty());
    }

    #[test]
    fn test_stale_deadline_is_ignored() {
        let (mut call, _, _) = active_call();
        let stale = armed_generation(&call.request_recovery("conn-a"));
        call.media_state("conn-a", MediaConnectionState::Connected);

        let fresh = armed_generation(&call.request_recovery("conn-b"));
        assert_ne!(stale, fresh);
        assert!(call.recovery_expired(stale).is_empty());
        assert!(call.is_recovering());
    }

    #[test]
    fn test_disconnect_while_recovering_is_suppressed() {
        let (mut call, _, _) = active_call();
        call.party_disconnected("conn-a");
        assert!(call.party_disconnected("conn-b").is_empty());
        assert!(call.is_recovering());
    }

    #[test]
    fn test_ringing_caller_disconnect_cancels() {
        let mut call = CallCoordinator::new(Duration::from_secs(120));
        call.call_user(&member("conn-a", "user-a", "Alice"));
        let effects = call.party_disconnected("conn-a");
        assert_eq!(effects.deliveries.len(), 1);
        assert_eq!(call.phase(), CallPhase::Idle);
    }

    #[test]
    fn test_rejoin_rebinds_party() {
        let (mut call, _, _) = active_call();
        call.party_disconnected("conn-a");

        let rejoined = member("conn-a2", "user-a", "Alice");
        let effects = call.party_rejoined(&rejoined);
        assert_eq!(
            effects.deliveries,
            vec![Delivery::to(
                "conn-b",
                ServerEvent::VcReconnect {
                    id: "conn-a2".to_string(),
                }
            )]
        );
        assert_eq!(call.peer_of("conn-b").unwrap().connection_id, "conn-a2");

        // unrelated member changes nothing
        assert!(call.party_rejoined(&member("conn-c", "user-c", "Carol")).is_empty());

        let effects = call.media_state("conn-a2", MediaConnectionState::Connected);
        assert_eq!(effects.deliveries.len(), 2);
        assert_eq!(call.phase(), CallPhase::Active);
    }

    #[test]
    fn test_rejoin_before_old_connection_leaves() {
        let (mut call, _, _) = active_call();

        let rejoined = member("conn-a2", "user-a", "Alice");
        let effects = call.party_rejoined(&rejoined);
        armed_generation(&effects);
        assert_eq!(
            effects.deliveries,
            vec![Delivery::to(
                "conn-b",
                ServerEvent::VcReconnect {
                    id: "conn-a2".to_string(),
                }
            )]
        );
        assert!(call.is_recovering());
        assert_eq!(call.peer_of("conn-b").unwrap().connection_id, "conn-a2");

        // the stale socket is no longer a party
        assert!(call.party_disconnected("conn-a").is_empty());
        assert!(call.peer_of("conn-a").is_none());

        let effects = call.media_state("conn-a2", MediaConnectionState::Connected);
        assert_eq!(effects.timer, Some(TimerCommand::DisarmRecovery));
        assert_eq!(
            effects.deliveries,
            vec![
                Delivery::to("conn-a2", ServerEvent::VcRecovered),
                Delivery::to("conn-b", ServerEvent::VcRecovered),
            ]
        );
    }

    #[test]
    fn test_teardown_disarms() {
        let (mut call, _, _) = active_call();
        call.request_recovery("conn-a");
        assert_eq!(call.teardown().timer, Some(TimerCommand::DisarmRecovery));
        assert_eq!(call.phase(), CallPhase::Idle);
    }
}
