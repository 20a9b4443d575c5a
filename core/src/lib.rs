//! Jayk chatbot core
//!
//! This crate provides the core of a modular chatbot for IRC-style servers:
//! the message codec, the per-connection protocol state machine, the module
//! registry and command dispatch, and the reconciliation engine that keeps
//! loaded modules and joined rooms in line with configuration.

pub mod client;
pub mod config;
pub mod connection;
pub mod driver;
pub mod error;
pub mod message;
pub mod module;
pub mod numeric;
pub mod reconcile;
pub mod session;
pub mod timer;
pub mod user;
pub mod watcher;


pub use client::{Client, ClientHandle, ClientState, NickRotation};
pub use config::{BotConfig, ModuleConfig, ServerConfig};
pub use connection::{connect, ConnectInfo, ConnectionStream};
pub use driver::{ConfigDiff, Driver};
pub use error::{Error, Result};
pub use message::{Command, Message, OtherCommand};
pub use module::{
    CommandHandler, CommandSet, Context, Module, ModuleCatalog, ModuleFactory, ModuleParams, ModuleRegistry,
    ModuleSummary, Route, Who,
};
pub use numeric::Response;
pub use reconcile::{Action, ActualState, DesiredState, Reconciler, State};
pub use session::{Control, Session, SessionHandle};
pub use timer::{Scheduler, TimerHandle, TimerTarget};
pub use user::User;
pub use watcher::ConfigWatcher;

/// Re-exports for convenience
pub use serde::{Deserialize, Serialize};
pub use tracing::{debug, error, info, warn};
