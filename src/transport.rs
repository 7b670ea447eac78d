//! Change detection over the host's transport record. The host hands us the full record on every
//! process call; clients only want to hear about the parts that moved.

use clap_sys::events::{
    clap_event_transport, CLAP_TRANSPORT_IS_LOOP_ACTIVE, CLAP_TRANSPORT_IS_PLAYING,
    CLAP_TRANSPORT_IS_RECORDING, CLAP_TRANSPORT_IS_WITHIN_PRE_ROLL,
};

use crate::event::{PluginEvent, TransportChanges, TransportSnapshot};

/// Compares each incoming transport record against the last seen one, grouped into five field
/// groups (flags, position, tempo, loop, time signature), and emits a minimal delta event.
///
/// Only the audio thread drives this; the instance keeps it behind an `AtomicRefCell`.
#[derive(Debug, Default)]
pub struct TransportWatcher {
    current: TransportSnapshot,
}

impl TransportWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff `transport` against the last update. Returns the delta event to forward when at least
    /// one group changed, and `None` when the record is identical.
    ///
    /// A single changed group travels as just that sub-message (a flags-only change as just the
    /// flags). Two or more changed groups collapse into one full-snapshot event so that clients
    /// observing a discontinuity never have to stitch partial updates together.
    pub fn update(&mut self, transport: &clap_event_transport) -> Option<PluginEvent> {
        let next = TransportSnapshot::from_raw(transport);

        let mut changed = TransportChanges::empty();
        if self.current.flags != next.flags {
            changed |= TransportChanges::FLAGS;
        }
        if !self.current.position_eq(&next) {
            changed |= TransportChanges::POSITION;
        }
        if !self.current.tempo_eq(&next) {
            changed |= TransportChanges::TEMPO;
        }
        if !self.current.loop_eq(&next) {
            changed |= TransportChanges::LOOP;
        }
        if !self.current.time_signature_eq(&next) {
            changed |= TransportChanges::TIME_SIGNATURE;
        }

        if changed.is_empty() {
            return None;
        }

        self.current = next;
        Some(PluginEvent::Transport {
            changed,
            snapshot: next,
        })
    }

    /// The last record this watcher has seen.
    pub fn current(&self) -> &TransportSnapshot {
        &self.current
    }

    pub fn is_playing(&self) -> bool {
        self.current.flags & CLAP_TRANSPORT_IS_PLAYING != 0
    }

    pub fn is_recording(&self) -> bool {
        self.current.flags & CLAP_TRANSPORT_IS_RECORDING != 0
    }

    pub fn is_loop_active(&self) -> bool {
        self.current.flags & CLAP_TRANSPORT_IS_LOOP_ACTIVE != 0
    }

    pub fn is_within_pre_roll(&self) -> bool {
        self.current.flags & CLAP_TRANSPORT_IS_WITHIN_PRE_ROLL != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap_sys::events::{clap_event_header, CLAP_CORE_EVENT_SPACE_ID, CLAP_EVENT_TRANSPORT};
    use std::mem;

    fn transport_record() -> clap_event_transport {
        clap_event_transport {
            header: clap_event_header {
                size: mem::size_of::<clap_event_transport>() as u32,
                time: 0,
                space_id: CLAP_CORE_EVENT_SPACE_ID,
                type_: CLAP_EVENT_TRANSPORT,
                flags: 0,
            },
            flags: 0,
            song_pos_beats: 0,
            song_pos_seconds: 0,
            tempo: 0.0,
            tempo_inc: 0.0,
            loop_start_beats: 0,
            loop_end_beats: 0,
            loop_start_seconds: 0,
            loop_end_seconds: 0,
            bar_start: 0,
            bar_number: 0,
            tsig_num: 0,
            tsig_denom: 0,
        }
    }

    fn changed_groups(event: Option<PluginEvent>) -> TransportChanges {
        match event {
            Some(PluginEvent::Transport { changed, .. }) => changed,
            other => panic!("expected a transport event, got {other:?}"),
        }
    }

    #[test]
    fn identical_record_emits_nothing() {
        let mut watcher = TransportWatcher::new();
        let record = transport_record();

        // The baseline is the all-zero record, so the first identical update is silent
        assert!(watcher.update(&record).is_none());
        assert!(watcher.update(&record).is_none());
    }

    #[test]
    fn first_discontinuity_collapses_to_full_snapshot() {
        let mut watcher = TransportWatcher::new();
        let mut record = transport_record();
        record.flags = 1;
        record.tempo = 120.0;

        let changed = changed_groups(watcher.update(&record));
        assert_eq!(changed, TransportChanges::FLAGS | TransportChanges::TEMPO);

        match watcher.update(&record) {
            None => {}
            other => panic!("repeat update must be silent, got {other:?}"),
        }
    }

    #[test]
    fn position_only_change_stays_minimal() {
        let mut watcher = TransportWatcher::new();
        let mut record = transport_record();
        record.flags = 1;
        record.tempo = 120.0;
        watcher.update(&record);

        record.song_pos_beats = 480;
        let event = watcher.update(&record);
        assert_eq!(changed_groups(event), TransportChanges::POSITION);
        match event {
            Some(PluginEvent::Transport { snapshot, .. }) => {
                assert_eq!(snapshot.song_pos_beats, 480);
                assert_eq!(snapshot.song_pos_seconds, 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn each_group_is_compared_independently() {
        let mut watcher = TransportWatcher::new();

        let mut record = transport_record();
        record.tempo_inc = 0.5;
        assert_eq!(changed_groups(watcher.update(&record)), TransportChanges::TEMPO);

        record.loop_end_seconds = 44_100;
        assert_eq!(changed_groups(watcher.update(&record)), TransportChanges::LOOP);

        record.tsig_num = 4;
        record.tsig_denom = 4;
        assert_eq!(
            changed_groups(watcher.update(&record)),
            TransportChanges::TIME_SIGNATURE
        );

        // Bar bookkeeping is not watched
        record.bar_number = 8;
        assert!(watcher.update(&record).is_none());
    }

    #[test]
    fn flag_accessors_reflect_last_update() {
        let mut watcher = TransportWatcher::new();
        assert!(!watcher.is_playing());

        let mut record = transport_record();
        record.flags = CLAP_TRANSPORT_IS_PLAYING | CLAP_TRANSPORT_IS_LOOP_ACTIVE;
        watcher.update(&record);

        assert!(watcher.is_playing());
        assert!(watcher.is_loop_active());
        assert!(!watcher.is_recording());
        assert!(!watcher.is_within_pre_roll());
    }
}
