//! URNs for the control messages exchanged between the kernel and its
//! components.

pub const PERCEPTION_PUSH: &str = "urn:rescue:message:perception-push";
pub const COMMAND_RESPONSE: &str = "urn:rescue:message:command-response";
pub const COMMAND_PUSH: &str = "urn:rescue:message:command-push";
pub const UPDATE_RESPONSE: &str = "urn:rescue:message:update-response";
pub const UPDATE_PUSH: &str = "urn:rescue:message:update-push";
pub const TIMESTEP_BROADCAST: &str = "urn:rescue:message:timestep-broadcast";
