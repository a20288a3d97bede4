use thiserror::Error;

use rescue_proto::ConfigError;

/// Errors that stop a kernel from being constructed or a round from
/// completing. Per-component failures are not kernel errors: a lost
/// connection degrades the round, it does not abort the exercise.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("round interrupted")]
    Interrupted,
    #[error("couldn't write simulation log: {0}")]
    Log(#[from] LogError),
    #[error("bad kernel configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("no {kind} strategy registered under {name:?}")]
    UnknownStrategy { kind: &'static str, name: String },
}

/// Failure of a single component connection. Fatal to that connection only.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection to {peer} closed")]
    Closed { peer: String },
    #[error("send to {peer} failed: {source}")]
    Send {
        peer: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("couldn't open log file {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("couldn't write log record: {0}")]
    Write(#[from] std::io::Error),
}
