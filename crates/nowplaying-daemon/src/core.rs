//! HubCore: single-owner event loop for the now-playing record.
//!
//! Every socket connection and HTTP handler talks to the core through
//! `HubEvent` messages.  The core owns the `Arbiter` and the reporter
//! registry exclusively; no other task touches them, so each submitted
//! report is one indivisible read-decide-write step.
//!
//! After each event that changes the held record, the core publishes a new
//! `HubState` on a `watch` channel.  Watchers and read-only endpoints
//! observe that channel instead of asking the core.

use std::collections::HashMap;

use nowplaying_proto::arbiter::{Arbiter, Outcome};
use nowplaying_proto::protocol::{HubState, MediaReport, MediaSnapshot, PlayerCommand, SourceId};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

// ── HubEvent ──────────────────────────────────────────────────────────────────

/// All inputs into the HubCore loop.
#[derive(Debug)]
pub enum HubEvent {
    /// A connection opened; routed commands for `source_id` go to `commands`.
    ReporterConnected {
        source_id: SourceId,
        commands: mpsc::Sender<PlayerCommand>,
    },
    ReporterDisconnected(SourceId),
    /// `updateInfo` from a reporter.
    Update {
        source_id: SourceId,
        report: MediaReport,
    },
    /// `getInfo`; answered in event order.
    GetInfo(oneshot::Sender<Option<MediaSnapshot>>),
    /// `sendCommand` from a control surface.
    SendCommand(PlayerCommand),
    /// Shutdown requested.
    Shutdown,
}

// ── HubCore ───────────────────────────────────────────────────────────────────

pub struct HubCore {
    arbiter: Arbiter,
    reporters: HashMap<SourceId, mpsc::Sender<PlayerCommand>>,
    state_tx: watch::Sender<HubState>,
    rev: u64,
}

impl HubCore {
    pub fn new() -> (Self, watch::Receiver<HubState>) {
        let (state_tx, state_rx) = watch::channel(HubState::default());
        let core = Self {
            arbiter: Arbiter::new(),
            reporters: HashMap::new(),
            state_tx,
            rev: 0,
        };
        (core, state_rx)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender has been dropped.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<HubEvent>) -> anyhow::Result<()> {
        info!("HubCore: starting event loop");

        while let Some(evt) = event_rx.recv().await {
            if !self.handle(evt) {
                info!("HubCore: shutdown requested");
                return Ok(());
            }
        }

        info!("HubCore: event channel closed, shutting down");
        Ok(())
    }

    /// Apply one event.  Returns `false` when the loop should stop.
    fn handle(&mut self, evt: HubEvent) -> bool {
        match evt {
            HubEvent::ReporterConnected {
                source_id,
                commands,
            } => {
                debug!("HubCore: source {} registered", source_id);
                self.reporters.insert(source_id, commands);
            }

            HubEvent::ReporterDisconnected(source_id) => {
                debug!("HubCore: source {} gone", source_id);
                self.reporters.remove(&source_id);
            }

            HubEvent::Update { source_id, report } => {
                let outcome = self.arbiter.submit_report(source_id, report);
                match outcome {
                    Outcome::Rejected => {
                        debug!("HubCore: update from {} dropped", source_id);
                    }
                    Outcome::Ignored { rule } => {
                        debug!("HubCore: update from {} ignored ({})", source_id, rule);
                    }
                    Outcome::Replaced { rule } => {
                        if let Some(held) = self.arbiter.current() {
                            info!(
                                "HubCore: now playing {:?} from {} ({})",
                                held.title, source_id, rule
                            );
                        }
                    }
                    Outcome::Cleared { rule } => {
                        info!("HubCore: {} has no media, cleared ({})", source_id, rule);
                    }
                    Outcome::Merged { rule } => {
                        debug!("HubCore: refresh from {} ({})", source_id, rule);
                    }
                }
                if outcome.is_mutation() {
                    self.publish();
                }
            }

            HubEvent::GetInfo(reply) => {
                let _ = reply.send(self.arbiter.current().cloned());
            }

            HubEvent::SendCommand(command) => self.route(command),

            HubEvent::Shutdown => return false,
        }
        true
    }

    fn route(&mut self, command: PlayerCommand) {
        let Some(target) = self.arbiter.command_target() else {
            debug!("HubCore: no authoritative source for {}", command);
            return;
        };
        let Some(sender) = self.reporters.get(&target) else {
            debug!("HubCore: source {} is not connected, {} dropped", target, command);
            return;
        };
        info!("HubCore: routing {} to {}", command, target);
        if sender.try_send(command).is_err() {
            warn!("HubCore: command queue for {} unavailable, {} dropped", target, command);
        }
    }

    /// Push the held record to watchers, skipping no-op merges.
    fn publish(&mut self) {
        let media = self.arbiter.current().cloned();
        if self.state_tx.borrow().media == media {
            return;
        }
        self.rev += 1;
        self.state_tx.send_replace(HubState {
            rev: self.rev,
            media,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: SourceId = SourceId(1);
    const B: SourceId = SourceId(2);

    fn connect(core: &mut HubCore, source_id: SourceId) -> mpsc::Receiver<PlayerCommand> {
        let (tx, rx) = mpsc::channel(4);
        core.handle(HubEvent::ReporterConnected {
            source_id,
            commands: tx,
        });
        rx
    }

    fn update(core: &mut HubCore, source_id: SourceId, report: MediaReport) {
        core.handle(HubEvent::Update { source_id, report });
    }

    #[test]
    fn test_command_goes_to_authoritative_source() {
        let (mut core, _state) = HubCore::new();
        let mut rx_a = connect(&mut core, A);
        let mut rx_b = connect(&mut core, B);

        update(&mut core, A, MediaReport::new("X", false, 10));
        update(&mut core, B, MediaReport::new("Y", true, 5));
        core.handle(HubEvent::SendCommand(PlayerCommand::Forward));

        assert_eq!(rx_b.try_recv().unwrap(), PlayerCommand::Forward);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_command_without_media_is_noop() {
        let (mut core, state) = HubCore::new();
        let mut rx_a = connect(&mut core, A);

        core.handle(HubEvent::SendCommand(PlayerCommand::PlayPause));

        assert!(rx_a.try_recv().is_err());
        assert_eq!(state.borrow().rev, 0);
    }

    #[test]
    fn test_command_to_disconnected_source_is_dropped() {
        let (mut core, _state) = HubCore::new();
        let _rx = connect(&mut core, A);
        update(&mut core, A, MediaReport::new("X", true, 1));
        core.handle(HubEvent::ReporterDisconnected(A));

        core.handle(HubEvent::SendCommand(PlayerCommand::Rewind));
        assert_eq!(core.arbiter.command_target(), Some(A));
    }

    #[test]
    fn test_state_rev_tracks_changes() {
        let (mut core, state) = HubCore::new();

        update(&mut core, A, MediaReport::new("X", true, 1));
        assert_eq!(state.borrow().rev, 1);

        // Rejected: older, same play state, other source.
        update(&mut core, B, MediaReport::new("Y", true, 0));
        assert_eq!(state.borrow().rev, 1);

        update(&mut core, A, MediaReport::new("X", true, 2));
        assert_eq!(state.borrow().rev, 2);
        assert_eq!(state.borrow().media.as_ref().unwrap().timestamp, 2);

        update(&mut core, A, MediaReport::empty());
        assert_eq!(state.borrow().rev, 3);
        assert!(state.borrow().media.is_none());
    }

    #[tokio::test]
    async fn test_run_answers_get_info_in_order() {
        let (core, _state) = HubCore::new();
        let (event_tx, event_rx) = mpsc::channel(16);
        let handle = tokio::spawn(core.run(event_rx));

        event_tx
            .send(HubEvent::Update {
                source_id: A,
                report: MediaReport::new("X", true, 1).with_image("img"),
            })
            .await
            .unwrap();
        let (reply_tx, reply_rx) = oneshot::channel();
        event_tx.send(HubEvent::GetInfo(reply_tx)).await.unwrap();

        let media = reply_rx.await.unwrap().unwrap();
        assert_eq!(media.title, "X");
        assert_eq!(media.image.as_deref(), Some("img"));

        event_tx.send(HubEvent::Shutdown).await.unwrap();
        handle.await.unwrap().unwrap();
    }
}
