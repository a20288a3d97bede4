use std::io::Read;

use crate::change_set::ChangeSet;
use crate::codec::{
    read_stream_bytes, read_stream_string, string_bytes_length, write_i32, write_string,
    write_u32, ByteReader, ProtoError,
};
use crate::command::{
    command_list_bytes_length, read_command_list, write_command_list, Command,
};
use crate::entity::EntityId;
use crate::registry::Registry;
use crate::urn;

/// A control message exchanged between the kernel and a component.
///
/// On the wire every message is a URN, a 4-byte payload length, and the
/// payload components in a fixed order matching encoding. The length prefix
/// lets a reader validate or skip a frame without parsing it; a frame whose
/// payload does not consume exactly the declared length is treated as
/// protocol corruption.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Kernel -> agent: what the agent can see and hear this round.
    PerceptionPush {
        agent: EntityId,
        round: u32,
        visible: ChangeSet,
        heard: Vec<Command>,
    },
    /// Agent -> kernel: the agent's commands for a round.
    CommandResponse {
        agent: EntityId,
        round: u32,
        commands: Vec<Command>,
    },
    /// Kernel -> simulator: the accepted commands for a round.
    CommandPush { round: u32, commands: Vec<Command> },
    /// Simulator -> kernel: the simulator's world-state delta for a round.
    UpdateResponse {
        name: String,
        round: u32,
        changes: ChangeSet,
    },
    /// Kernel -> simulator: the merged delta for a round.
    UpdatePush { round: u32, changes: ChangeSet },
    /// Kernel -> viewer: the completed round.
    TimestepBroadcast {
        round: u32,
        commands: Vec<Command>,
        changes: ChangeSet,
    },
}

impl Message {
    pub fn urn(&self) -> &'static str {
        match self {
            Message::PerceptionPush { .. } => urn::PERCEPTION_PUSH,
            Message::CommandResponse { .. } => urn::COMMAND_RESPONSE,
            Message::CommandPush { .. } => urn::COMMAND_PUSH,
            Message::UpdateResponse { .. } => urn::UPDATE_RESPONSE,
            Message::UpdatePush { .. } => urn::UPDATE_PUSH,
            Message::TimestepBroadcast { .. } => urn::TIMESTEP_BROADCAST,
        }
    }

    fn body_length(&self) -> usize {
        match self {
            Message::PerceptionPush {
                visible, heard, ..
            } => 4 + 4 + visible.bytes_length() + command_list_bytes_length(heard),
            Message::CommandResponse { commands, .. } => {
                4 + 4 + command_list_bytes_length(commands)
            }
            Message::CommandPush { commands, .. } => 4 + command_list_bytes_length(commands),
            Message::UpdateResponse { name, changes, .. } => {
                string_bytes_length(name) + 4 + changes.bytes_length()
            }
            Message::UpdatePush { changes, .. } => 4 + changes.bytes_length(),
            Message::TimestepBroadcast {
                commands, changes, ..
            } => 4 + command_list_bytes_length(commands) + changes.bytes_length(),
        }
    }

    /// Total encoded size: URN, length prefix and payload.
    pub fn bytes_length(&self) -> usize {
        string_bytes_length(self.urn()) + 4 + self.body_length()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_string(self.urn(), out);
        write_i32(self.body_length() as i32, out);
        match self {
            Message::PerceptionPush {
                agent,
                round,
                visible,
                heard,
            } => {
                write_u32(agent.0, out);
                write_u32(*round, out);
                visible.write_to(out);
                write_command_list(heard, out);
            }
            Message::CommandResponse {
                agent,
                round,
                commands,
            } => {
                write_u32(agent.0, out);
                write_u32(*round, out);
                write_command_list(commands, out);
            }
            Message::CommandPush { round, commands } => {
                write_u32(*round, out);
                write_command_list(commands, out);
            }
            Message::UpdateResponse {
                name,
                round,
                changes,
            } => {
                write_string(name, out);
                write_u32(*round, out);
                changes.write_to(out);
            }
            Message::UpdatePush { round, changes } => {
                write_u32(*round, out);
                changes.write_to(out);
            }
            Message::TimestepBroadcast {
                round,
                commands,
                changes,
            } => {
                write_u32(*round, out);
                write_command_list(commands, out);
                changes.write_to(out);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.bytes_length());
        self.write_to(&mut out);
        out
    }

    fn decode_body(urn: &str, body: &[u8], registry: &Registry) -> Result<Self, ProtoError> {
        let mut reader = ByteReader::new(body);
        let message = match urn {
            urn::PERCEPTION_PUSH => Message::PerceptionPush {
                agent: EntityId(reader.read_u32()?),
                round: reader.read_u32()?,
                visible: ChangeSet::read_from(&mut reader, registry)?,
                heard: read_command_list(&mut reader)?,
            },
            urn::COMMAND_RESPONSE => Message::CommandResponse {
                agent: EntityId(reader.read_u32()?),
                round: reader.read_u32()?,
                commands: read_command_list(&mut reader)?,
            },
            urn::COMMAND_PUSH => Message::CommandPush {
                round: reader.read_u32()?,
                commands: read_command_list(&mut reader)?,
            },
            urn::UPDATE_RESPONSE => Message::UpdateResponse {
                name: reader.read_string()?,
                round: reader.read_u32()?,
                changes: ChangeSet::read_from(&mut reader, registry)?,
            },
            urn::UPDATE_PUSH => Message::UpdatePush {
                round: reader.read_u32()?,
                changes: ChangeSet::read_from(&mut reader, registry)?,
            },
            urn::TIMESTEP_BROADCAST => Message::TimestepBroadcast {
                round: reader.read_u32()?,
                commands: read_command_list(&mut reader)?,
                changes: ChangeSet::read_from(&mut reader, registry)?,
            },
            other => return Err(ProtoError::UnknownMessageUrn(other.to_string())),
        };
        if reader.remaining() != 0 {
            return Err(ProtoError::LengthMismatch {
                declared: body.len(),
                consumed: reader.position(),
            });
        }
        Ok(message)
    }

    /// Decode a single frame held in memory.
    pub fn decode(frame: &[u8], registry: &Registry) -> Result<Self, ProtoError> {
        let mut reader = ByteReader::new(frame);
        let urn = reader.read_string()?;
        let declared = reader.read_len()?;
        let body = reader.read_bytes(declared)?;
        if reader.remaining() != 0 {
            return Err(ProtoError::LengthMismatch {
                declared,
                consumed: declared + reader.remaining(),
            });
        }
        Self::decode_body(&urn, body, registry)
    }

    /// Read and decode one frame from a blocking stream.
    pub fn read_stream(reader: &mut impl Read, registry: &Registry) -> Result<Self, ProtoError> {
        let urn = read_stream_string(reader)?;
        let declared = crate::codec::read_stream_len(reader)?;
        let body = read_stream_bytes(reader, declared)?;
        Self::decode_body(&urn, &body, registry)
    }
}
