//! The wire schema of the plugin service, plus the conversions from ring-level events to wire
//! messages.
//!
//! The message structs are written out by hand with `prost` derives instead of being generated
//! from a `.proto` file, so building the crate does not require `protoc`. They encode the same
//! schema a `package api;` proto file would: one bidirectional event stream message pair and a
//! unary instance listing.

use crate::event::{PluginEvent, TransportChanges, TransportSnapshot};

pub mod grpc;

/// A control request sent by a client over the event stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ClientEvent {
    RequestRestart = 0,
    RequestProcess = 1,
    EnableTransportEvents = 2,
    DisableTransportEvents = 3,
}

/// Plugin lifecycle transitions forwarded to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PluginLifecycleEvent {
    Activate = 0,
    Deactivate = 1,
    StartProcessing = 2,
    StopProcessing = 3,
    Reset = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum NoteType {
    NoteOn = 0,
    NoteOff = 1,
    NoteChoke = 2,
    NoteEnd = 3,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ClientEventMessage {
    #[prost(enumeration = "ClientEvent", tag = "1")]
    pub event: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PluginEventMessage {
    #[prost(oneof = "plugin_event_message::Kind", tags = "1, 2, 3, 4")]
    pub kind: ::core::option::Option<plugin_event_message::Kind>,
}

pub mod plugin_event_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(enumeration = "super::PluginLifecycleEvent", tag = "1")]
        Event(i32),
        #[prost(message, tag = "2")]
        Note(super::Note),
        #[prost(message, tag = "3")]
        Midi(super::Midi),
        #[prost(message, tag = "4")]
        Transport(super::Transport),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Note {
    #[prost(enumeration = "NoteType", tag = "1")]
    pub r#type: i32,
    #[prost(int32, tag = "2")]
    pub note_id: i32,
    #[prost(int32, tag = "3")]
    pub port_index: i32,
    #[prost(int32, tag = "4")]
    pub channel: i32,
    #[prost(int32, tag = "5")]
    pub key: i32,
    #[prost(double, tag = "6")]
    pub velocity: f64,
}

/// Raw MIDI bytes. Whether this is a MIDI 1.0 message, a SysEx payload, or MIDI 2.0 UMP words
/// follows from the byte length, by the same convention the CLAP events use.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Midi {
    #[prost(uint32, tag = "1")]
    pub port_index: u32,
    #[prost(bytes = "vec", tag = "2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

/// A transport delta. `flags` is only populated when the flags group changed; the payload carries
/// either the single changed group or, on discontinuities, a full snapshot.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Transport {
    #[prost(uint32, optional, tag = "1")]
    pub flags: ::core::option::Option<u32>,
    #[prost(oneof = "transport::Kind", tags = "2, 3, 4, 5, 6")]
    pub kind: ::core::option::Option<transport::Kind>,
}

pub mod transport {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "2")]
        TransportAll(super::TransportAll),
        #[prost(message, tag = "3")]
        Position(super::TransportPosition),
        #[prost(message, tag = "4")]
        Tempo(super::TransportTempo),
        #[prost(message, tag = "5")]
        Loop(super::TransportLoop),
        #[prost(message, tag = "6")]
        TimeSig(super::TransportTimeSignature),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct TransportAll {
    #[prost(message, optional, tag = "1")]
    pub position: ::core::option::Option<TransportPosition>,
    #[prost(message, optional, tag = "2")]
    pub tempo: ::core::option::Option<TransportTempo>,
    #[prost(message, optional, tag = "3")]
    pub r#loop: ::core::option::Option<TransportLoop>,
    #[prost(message, optional, tag = "4")]
    pub time_sig: ::core::option::Option<TransportTimeSignature>,
}

/// Song position in CLAP fixed-point beats and seconds.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TransportPosition {
    #[prost(sint64, tag = "1")]
    pub beats: i64,
    #[prost(sint64, tag = "2")]
    pub seconds: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TransportTempo {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(double, tag = "2")]
    pub increment: f64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TransportLoop {
    #[prost(sint64, tag = "1")]
    pub start_beats: i64,
    #[prost(sint64, tag = "2")]
    pub end_beats: i64,
    #[prost(sint64, tag = "3")]
    pub start_seconds: i64,
    #[prost(sint64, tag = "4")]
    pub end_seconds: i64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct TransportTimeSignature {
    #[prost(uint32, tag = "1")]
    pub numerator: u32,
    #[prost(uint32, tag = "2")]
    pub denominator: u32,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Empty {}

/// The unary listing of live plugin instances: kind id to instance id.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PluginInstances {
    #[prost(map = "string, uint64", tag = "1")]
    pub instances: ::std::collections::HashMap<::prost::alloc::string::String, u64>,
}

impl PluginEventMessage {
    /// Build the wire message for a ring-level event. Runs on the queue worker thread, never on
    /// the audio thread, so the allocations in here are fine.
    pub fn from_event(event: PluginEvent) -> Self {
        let kind = match event {
            PluginEvent::Lifecycle(lifecycle) => {
                plugin_event_message::Kind::Event(lifecycle as i32)
            }
            PluginEvent::Note {
                kind,
                note_id,
                port_index,
                channel,
                key,
                velocity,
            } => plugin_event_message::Kind::Note(Note {
                r#type: kind as i32,
                note_id,
                port_index: i32::from(port_index),
                channel: i32::from(channel),
                key: i32::from(key),
                velocity,
            }),
            PluginEvent::Midi { port_index, data } => plugin_event_message::Kind::Midi(Midi {
                port_index: u32::from(port_index),
                data: data.as_bytes().to_vec(),
            }),
            PluginEvent::Transport { changed, snapshot } => {
                plugin_event_message::Kind::Transport(transport_message(changed, &snapshot))
            }
        };

        Self { kind: Some(kind) }
    }
}

/// Encode a transport delta: a single changed group travels alone, anything more collapses into
/// one full `transport_all` envelope.
fn transport_message(changed: TransportChanges, snapshot: &TransportSnapshot) -> Transport {
    let kind = if changed == TransportChanges::POSITION {
        Some(transport::Kind::Position(position_of(snapshot)))
    } else if changed == TransportChanges::TEMPO {
        Some(transport::Kind::Tempo(tempo_of(snapshot)))
    } else if changed == TransportChanges::LOOP {
        Some(transport::Kind::Loop(loop_of(snapshot)))
    } else if changed == TransportChanges::TIME_SIGNATURE {
        Some(transport::Kind::TimeSig(time_sig_of(snapshot)))
    } else if changed == TransportChanges::FLAGS {
        None
    } else {
        Some(transport::Kind::TransportAll(TransportAll {
            position: Some(position_of(snapshot)),
            tempo: Some(tempo_of(snapshot)),
            r#loop: Some(loop_of(snapshot)),
            time_sig: Some(time_sig_of(snapshot)),
        }))
    };

    Transport {
        flags: if changed == TransportChanges::POSITION
            || changed == TransportChanges::TEMPO
            || changed == TransportChanges::LOOP
            || changed == TransportChanges::TIME_SIGNATURE
        {
            None
        } else {
            Some(snapshot.flags)
        },
        kind,
    }
}

fn position_of(snapshot: &TransportSnapshot) -> TransportPosition {
    TransportPosition {
        beats: snapshot.song_pos_beats,
        seconds: snapshot.song_pos_seconds,
    }
}

fn tempo_of(snapshot: &TransportSnapshot) -> TransportTempo {
    TransportTempo {
        value: snapshot.tempo,
        increment: snapshot.tempo_inc,
    }
}

fn loop_of(snapshot: &TransportSnapshot) -> TransportLoop {
    TransportLoop {
        start_beats: snapshot.loop_start_beats,
        end_beats: snapshot.loop_end_beats,
        start_seconds: snapshot.loop_start_seconds,
        end_seconds: snapshot.loop_end_seconds,
    }
}

fn time_sig_of(snapshot: &TransportSnapshot) -> TransportTimeSignature {
    TransportTimeSignature {
        numerator: u32::from(snapshot.tsig_num),
        denominator: u32::from(snapshot.tsig_denom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NoteKind;

    #[test]
    fn note_event_maps_every_field() {
        let message = PluginEventMessage::from_event(PluginEvent::Note {
            kind: NoteKind::NoteOn,
            note_id: 1,
            port_index: 0,
            channel: 0,
            key: 60,
            velocity: 0.5,
        });

        match message.kind {
            Some(plugin_event_message::Kind::Note(note)) => {
                assert_eq!(note.r#type, NoteType::NoteOn as i32);
                assert_eq!(note.note_id, 1);
                assert_eq!(note.port_index, 0);
                assert_eq!(note.channel, 0);
                assert_eq!(note.key, 60);
                assert_eq!(note.velocity, 0.5);
            }
            other => panic!("expected a note message, got {other:?}"),
        }
    }

    #[test]
    fn single_group_transport_delta_omits_flags() {
        let snapshot = TransportSnapshot {
            song_pos_beats: 480,
            ..TransportSnapshot::default()
        };
        let message = transport_message(TransportChanges::POSITION, &snapshot);

        assert_eq!(message.flags, None);
        match message.kind {
            Some(transport::Kind::Position(position)) => {
                assert_eq!(position.beats, 480);
                assert_eq!(position.seconds, 0);
            }
            other => panic!("expected a position-only delta, got {other:?}"),
        }
    }

    #[test]
    fn flags_only_delta_has_no_payload() {
        let snapshot = TransportSnapshot {
            flags: 0b101,
            ..TransportSnapshot::default()
        };
        let message = transport_message(TransportChanges::FLAGS, &snapshot);

        assert_eq!(message.flags, Some(0b101));
        assert!(message.kind.is_none());
    }

    #[test]
    fn multi_group_delta_collapses_to_transport_all() {
        let snapshot = TransportSnapshot {
            flags: 1,
            tempo: 120.0,
            ..TransportSnapshot::default()
        };
        let message =
            transport_message(TransportChanges::FLAGS | TransportChanges::TEMPO, &snapshot);

        assert_eq!(message.flags, Some(1));
        match message.kind {
            Some(transport::Kind::TransportAll(all)) => {
                assert_eq!(all.tempo.unwrap().value, 120.0);
                // The unchanged groups still travel, holding their current values
                assert_eq!(all.position.unwrap().beats, 0);
                assert_eq!(all.r#loop.unwrap().end_beats, 0);
                assert_eq!(all.time_sig.unwrap().numerator, 0);
            }
            other => panic!("expected a transport_all envelope, got {other:?}"),
        }
    }

    #[test]
    fn wire_round_trip() {
        use prost::Message;

        let message = PluginEventMessage::from_event(PluginEvent::Lifecycle(
            PluginLifecycleEvent::StartProcessing,
        ));
        let bytes = message.encode_to_vec();
        let decoded = PluginEventMessage::decode(bytes.as_slice()).unwrap();
        assert_eq!(message, decoded);
    }
}
