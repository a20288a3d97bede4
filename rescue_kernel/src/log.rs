//! Append-only simulation log: typed records in round order, each framed
//! exactly like a wire message (URN, 4-byte length, payload), written by the
//! round thread only. The resulting file is sufficient for deterministic
//! replay and audit of an exercise.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use rescue_proto::{
    command_list_bytes_length, string_bytes_length, write_command_list, write_i32, write_string,
    write_u32, ChangeSet, Command, Config, EntityId,
};

use crate::error::LogError;
use crate::world::WorldModel;

pub const START_RECORD: &str = "urn:rescue:record:start";
pub const INITIAL_CONDITIONS_RECORD: &str = "urn:rescue:record:initial-conditions";
pub const CONFIG_RECORD: &str = "urn:rescue:record:config";
pub const COMMANDS_RECORD: &str = "urn:rescue:record:commands";
pub const PERCEPTION_RECORD: &str = "urn:rescue:record:perception";
pub const UPDATES_RECORD: &str = "urn:rescue:record:updates";
pub const END_RECORD: &str = "urn:rescue:record:end";

/// A typed log record. Borrowed views keep the round loop allocation-free
/// apart from the encode buffer.
pub enum LogRecord<'a> {
    Start,
    InitialConditions(&'a WorldModel),
    Config(&'a Config),
    Commands {
        round: u32,
        commands: &'a [Command],
    },
    Perception {
        round: u32,
        agent: EntityId,
        visible: &'a ChangeSet,
        heard: &'a [Command],
    },
    Updates {
        round: u32,
        changes: &'a ChangeSet,
    },
    End,
}

impl LogRecord<'_> {
    pub fn urn(&self) -> &'static str {
        match self {
            LogRecord::Start => START_RECORD,
            LogRecord::InitialConditions(_) => INITIAL_CONDITIONS_RECORD,
            LogRecord::Config(_) => CONFIG_RECORD,
            LogRecord::Commands { .. } => COMMANDS_RECORD,
            LogRecord::Perception { .. } => PERCEPTION_RECORD,
            LogRecord::Updates { .. } => UPDATES_RECORD,
            LogRecord::End => END_RECORD,
        }
    }

    fn body_length(&self) -> usize {
        match self {
            LogRecord::Start | LogRecord::End => 0,
            LogRecord::InitialConditions(world) => {
                4 + world
                    .entities()
                    .map(|entity| entity.bytes_length())
                    .sum::<usize>()
            }
            LogRecord::Config(config) => config.bytes_length(),
            LogRecord::Commands { commands, .. } => 4 + command_list_bytes_length(commands),
            LogRecord::Perception {
                visible, heard, ..
            } => 4 + 4 + visible.bytes_length() + command_list_bytes_length(heard),
            LogRecord::Updates { changes, .. } => 4 + changes.bytes_length(),
        }
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        match self {
            LogRecord::Start | LogRecord::End => {}
            LogRecord::InitialConditions(world) => {
                write_i32(world.len() as i32, out);
                for entity in world.entities() {
                    entity.write_to(out);
                }
            }
            LogRecord::Config(config) => config.write_to(out),
            LogRecord::Commands { round, commands } => {
                write_u32(*round, out);
                write_command_list(commands, out);
            }
            LogRecord::Perception {
                round,
                agent,
                visible,
                heard,
            } => {
                write_u32(*round, out);
                write_u32(agent.0, out);
                visible.write_to(out);
                write_command_list(heard, out);
            }
            LogRecord::Updates { round, changes } => {
                write_u32(*round, out);
                changes.write_to(out);
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_length = self.body_length();
        let mut out = Vec::with_capacity(string_bytes_length(self.urn()) + 4 + body_length);
        write_string(self.urn(), &mut out);
        write_i32(body_length as i32, &mut out);
        self.write_body(&mut out);
        out
    }
}

/// Writes typed records to an append-only sink. Single writer: only the
/// round thread touches it, under the kernel's round lock.
pub struct LogWriter {
    sink: BufWriter<Box<dyn Write + Send>>,
}

impl LogWriter {
    /// Open a log file, creating parent directories as needed. Failure here
    /// is fatal at kernel construction time.
    pub fn create(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| LogError::Open {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }
        let file = File::create(path).map_err(|source| LogError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(Box::new(file)))
    }

    pub fn new(sink: Box<dyn Write + Send>) -> Self {
        Self {
            sink: BufWriter::new(sink),
        }
    }

    pub fn write_record(&mut self, record: &LogRecord<'_>) -> Result<(), LogError> {
        self.sink.write_all(&record.encode())?;
        self.sink.flush()?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<(), LogError> {
        self.sink.flush()?;
        Ok(())
    }
}
