//! # dbot-core
//!
//! Transport-agnostic core for chat bots: the [`EventLoop`] reactor, the [`DbotError`] taxonomy,
//! user/room records and the collaborator traits ([`MessageHandler`], [`UserCreator`],
//! [`RoomCreator`]) a transport feeds, plus tracing initialization. Used by dbot-slack and dbot-cli.

pub mod error;
pub mod event_loop;
pub mod handler;
pub mod logger;
pub mod roster;
pub mod types;

pub use error::{CloseEvent, DbotError, Result};
pub use event_loop::{EventLoop, LoopHandle, DEFAULT_SHUTDOWN_GRACE};
pub use handler::LoggingHandler;
pub use logger::{init_tracing, mask_token};
pub use roster::InMemoryRoster;
pub use types::{
    MessageHandler, RobotIdentity, Room, RoomCreator, ToCoreRoom, ToCoreUser, User, UserCreator,
};
