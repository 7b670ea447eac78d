//! The events that travel through the per-instance rings. Everything in here is small, `Copy`,
//! and fixed-size: the audio thread only ever moves plain values into the outbound ring, and the
//! queue worker turns them into wire messages on its own time.

use bitflags::bitflags;
use clap_sys::events::clap_event_transport;

pub use crate::rpc::{ClientEvent, NoteType as NoteKind, PluginLifecycleEvent};

/// Sample rate and block size bounds, latched when the host activates the instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferConfig {
    pub sample_rate: f64,
    pub min_frames: u32,
    pub max_frames: u32,
}

/// A plugin-to-clients event as stored on the outbound ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PluginEvent {
    /// A lifecycle transition driven by a host callback.
    Lifecycle(PluginLifecycleEvent),
    /// A note event from the block's input event list.
    Note {
        kind: NoteKind,
        note_id: i32,
        port_index: i16,
        channel: i16,
        key: i16,
        velocity: f64,
    },
    /// Raw MIDI bytes (1.0, SysEx, or 2.0 UMP words, distinguished by length).
    Midi { port_index: u16, data: MidiData },
    /// A transport delta produced by the watcher. Carries the full new snapshot plus the mask of
    /// groups that actually changed; the wire layer prunes it down to the minimal message.
    Transport {
        changed: TransportChanges,
        snapshot: TransportSnapshot,
    },
}

bitflags! {
    /// The five comparison groups of the transport record.
    pub struct TransportChanges: u32 {
        const FLAGS = 1 << 0;
        const POSITION = 1 << 1;
        const TEMPO = 1 << 2;
        const LOOP = 1 << 3;
        const TIME_SIGNATURE = 1 << 4;
    }
}

const MIDI_DATA_CAPACITY: usize = 16;

/// An inline MIDI payload. Bounded so ring cells stay fixed-size; SysEx packets longer than
/// [`MidiData::CAPACITY`] are truncated, which a debug assertion calls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MidiData {
    len: u8,
    bytes: [u8; MIDI_DATA_CAPACITY],
}

impl MidiData {
    pub const CAPACITY: usize = MIDI_DATA_CAPACITY;

    /// A 3-byte MIDI 1.0 message.
    pub fn short(data: [u8; 3]) -> Self {
        let mut bytes = [0; Self::CAPACITY];
        bytes[..3].copy_from_slice(&data);
        Self { len: 3, bytes }
    }

    /// A SysEx payload. Truncates to the inline capacity.
    pub fn sysex(data: &[u8]) -> Self {
        remote_debug_assert!(
            data.len() <= Self::CAPACITY,
            "SysEx payload of {} bytes truncated to {}",
            data.len(),
            Self::CAPACITY
        );

        let len = data.len().min(Self::CAPACITY);
        let mut bytes = [0; Self::CAPACITY];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            len: len as u8,
            bytes,
        }
    }

    /// A MIDI 2.0 UMP packet, stored as the little-endian bytes of its words.
    pub fn midi2(words: [u32; 2]) -> Self {
        let mut bytes = [0; Self::CAPACITY];
        bytes[..4].copy_from_slice(&words[0].to_le_bytes());
        bytes[4..8].copy_from_slice(&words[1].to_le_bytes());
        Self { len: 8, bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The watched fields of the host's transport record. The same shape as `clap_event_transport`
/// minus the event header and the bar bookkeeping we never report on.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportSnapshot {
    pub flags: u32,
    pub song_pos_beats: i64,
    pub song_pos_seconds: i64,
    pub tempo: f64,
    pub tempo_inc: f64,
    pub loop_start_beats: i64,
    pub loop_end_beats: i64,
    pub loop_start_seconds: i64,
    pub loop_end_seconds: i64,
    pub tsig_num: u16,
    pub tsig_denom: u16,
}

impl TransportSnapshot {
    pub fn from_raw(transport: &clap_event_transport) -> Self {
        Self {
            flags: transport.flags,
            song_pos_beats: transport.song_pos_beats,
            song_pos_seconds: transport.song_pos_seconds,
            tempo: transport.tempo,
            tempo_inc: transport.tempo_inc,
            loop_start_beats: transport.loop_start_beats,
            loop_end_beats: transport.loop_end_beats,
            loop_start_seconds: transport.loop_start_seconds,
            loop_end_seconds: transport.loop_end_seconds,
            tsig_num: transport.tsig_num,
            tsig_denom: transport.tsig_denom,
        }
    }

    pub fn position_eq(&self, other: &Self) -> bool {
        self.song_pos_beats == other.song_pos_beats
            && self.song_pos_seconds == other.song_pos_seconds
    }

    pub fn tempo_eq(&self, other: &Self) -> bool {
        self.tempo == other.tempo && self.tempo_inc == other.tempo_inc
    }

    pub fn loop_eq(&self, other: &Self) -> bool {
        self.loop_start_beats == other.loop_start_beats
            && self.loop_end_beats == other.loop_end_beats
            && self.loop_start_seconds == other.loop_start_seconds
            && self.loop_end_seconds == other.loop_end_seconds
    }

    pub fn time_signature_eq(&self, other: &Self) -> bool {
        self.tsig_num == other.tsig_num && self.tsig_denom == other.tsig_denom
    }
}
