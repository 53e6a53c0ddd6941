//! Queued fan-out of ledger change events.
//!
//! Emission happens while the instance guard is held, so delivery must never
//! block or call back into guarded code: events land on unbounded channels
//! and observers drain them on their own threads, outside the critical
//! section.

use crate::CompetitionEvent;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;

#[derive(Debug, Default)]
pub struct EventHub {
    senders: Vec<Sender<CompetitionEvent>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new observer queue. Dropped receivers are pruned on the next
    /// emit.
    pub fn subscribe(&mut self) -> Receiver<CompetitionEvent> {
        let (sender, receiver) = unbounded();
        self.senders.push(sender);
        receiver
    }

    pub fn emit(&mut self, event: CompetitionEvent) {
        debug!("event: {event:?}");
        self.senders.retain(|sender| sender.send(event).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_events_reach_every_subscriber() {
        let mut hub = EventHub::new();
        let first = hub.subscribe();
        let second = hub.subscribe();

        let event = CompetitionEvent::VotesCleared {
            round: 0,
            competitor: 3,
        };
        hub.emit(event);
        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap(), event);
    }

    #[test_log::test]
    fn test_dropped_subscriber_is_pruned() {
        let mut hub = EventHub::new();
        let keep = hub.subscribe();
        drop(hub.subscribe());

        hub.emit(CompetitionEvent::VotesCleared {
            round: 1,
            competitor: 1,
        });
        assert_eq!(hub.senders.len(), 1);
        assert!(keep.try_recv().is_ok());
    }

    #[test_log::test]
    fn test_emit_never_blocks_without_consumers() {
        let mut hub = EventHub::new();
        let receiver = hub.subscribe();
        // a slow observer just queues up
        for competitor in 0..1000 {
            hub.emit(CompetitionEvent::VotesCleared {
                round: 0,
                competitor,
            });
        }
        assert_eq!(receiver.len(), 1000);
    }
}
