//! Lockstep coordination kernel for distributed disaster-simulation
//! exercises.
//!
//! Network-attached agents, physical-effect simulators and viewers advance
//! in globally synchronised rounds: each call to [`Kernel::timestep`]
//! computes perception, collects and filters agent commands, gathers the
//! simulators' world-state deltas, merges them deterministically into the
//! authoritative world model and broadcasts the result to every component
//! before the clock advances. Connection acceptance, bootstrap and domain
//! strategy implementations live outside this crate; the kernel consumes
//! them through [`strategy`] traits and the proxy types.

pub mod component;
pub mod connection;
pub mod error;
pub mod event_stream;
pub mod kernel;
pub mod listener;
pub mod log;
pub mod proxy;
pub mod registry;
pub mod strategy;
pub mod timestep;
pub mod world;

pub use component::{Agent, Simulator, Viewer};
pub use connection::{channel_pair, ChannelConnection, Connection, TcpConnection};
pub use error::{ConnectionError, KernelError, LogError};
pub use event_stream::{start_event_stream, EventStreamHandle, EventStreamListener, KernelEvent};
pub use kernel::{InterruptHandle, Kernel, KernelStrategies};
pub use listener::KernelListener;
pub use log::{LogRecord, LogWriter};
pub use proxy::{AgentProxy, SimulatorProxy, ViewerProxy};
pub use registry::StrategyRegistry;
pub use strategy::{
    ChainedCommandFilter, CommandCollector, CommandFilter, CommunicationModel,
    CompositeCommandCollector, KernelState, MaxRoundsTermination, OrTerminationCondition,
    Perception, ScoreFunction, TerminationCondition, TimedCommandCollector,
    WaitAllCommandCollector,
};
pub use timestep::{AgentPerception, Timestep};
pub use world::WorldModel;
