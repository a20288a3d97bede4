//! Wire protocol and data model for the lockstep rescue kernel.
//!
//! Defines the self-describing binary encoding shared by the kernel and its
//! network-attached components: primitive codecs, typed entity properties,
//! change-sets, agent commands, configuration snapshots and the control
//! message set. Every encodable type obeys the contract that
//! `bytes_length()` equals the number of bytes `write_to` emits.

mod change_set;
mod codec;
mod command;
mod config;
mod entity;
mod message;
mod property;
mod registry;
pub mod urn;

pub use change_set::ChangeSet;
pub use codec::{
    read_stream_bytes, read_stream_len, read_stream_string, string_bytes_length, write_bool,
    write_f64, write_i32, write_string, write_u32, ByteReader, ProtoError,
};
pub use command::{
    command_list_bytes_length, read_command_list, write_command_list, Command,
};
pub use config::{Config, ConfigError};
pub use entity::{Entity, EntityId, EntityIdGenerator};
pub use message::Message;
pub use property::{Property, PropertyKind, PropertyValue};
pub use registry::Registry;
