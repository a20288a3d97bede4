use crate::codec::{string_bytes_length, write_i32, write_string, write_u32, ByteReader, ProtoError};
use crate::entity::EntityId;

/// A command issued by an agent.
///
/// The kernel routes commands without interpreting them: the URN names the
/// command kind and the payload carries the domain content opaquely. Command
/// vocabularies are defined by the exercise, not by the core.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    urn: String,
    agent: EntityId,
    round: u32,
    payload: Vec<u8>,
}

impl Command {
    pub fn new(urn: impl Into<String>, agent: EntityId, round: u32, payload: Vec<u8>) -> Self {
        Self {
            urn: urn.into(),
            agent,
            round,
            payload,
        }
    }

    pub fn urn(&self) -> &str {
        &self.urn
    }

    pub fn agent(&self) -> EntityId {
        self.agent
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn body_length(&self) -> usize {
        4 + 4 + 4 + self.payload.len()
    }

    /// Total encoded size: URN, body-size prefix and body.
    pub fn bytes_length(&self) -> usize {
        string_bytes_length(&self.urn) + 4 + self.body_length()
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        write_string(&self.urn, out);
        write_i32(self.body_length() as i32, out);
        write_u32(self.agent.0, out);
        write_u32(self.round, out);
        write_i32(self.payload.len() as i32, out);
        out.extend_from_slice(&self.payload);
    }

    pub fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, ProtoError> {
        let urn = reader.read_string()?;
        let declared = reader.read_len()?;
        let start = reader.position();
        let agent = EntityId(reader.read_u32()?);
        let round = reader.read_u32()?;
        let payload_len = reader.read_len()?;
        let payload = reader.read_bytes(payload_len)?.to_vec();
        let consumed = reader.position() - start;
        if consumed != declared {
            return Err(ProtoError::LengthMismatch { declared, consumed });
        }
        Ok(Command {
            urn,
            agent,
            round,
            payload,
        })
    }
}

pub fn command_list_bytes_length(commands: &[Command]) -> usize {
    4 + commands.iter().map(Command::bytes_length).sum::<usize>()
}

pub fn write_command_list(commands: &[Command], out: &mut Vec<u8>) {
    write_i32(commands.len() as i32, out);
    for command in commands {
        command.write_to(out);
    }
}

pub fn read_command_list(reader: &mut ByteReader<'_>) -> Result<Vec<Command>, ProtoError> {
    let count = reader.read_len()?;
    let mut commands = Vec::with_capacity(count);
    for _ in 0..count {
        commands.push(Command::read_from(reader)?);
    }
    Ok(commands)
}
