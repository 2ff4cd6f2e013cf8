#[macro_use] extern crate derivative;
#[macro_use] extern crate log;

mod clock;
mod config;
mod election;
mod error;
mod game;
mod internal;
mod mutex;
mod node;
mod registry;
mod replica;
mod shared;
mod socket;
mod thread;
mod timer;

pub mod beacon;
pub mod message;
pub mod player;

pub use crate::clock::Clock;
pub use crate::config::{Config, Timing};
pub use crate::error::{Error, Parse};
pub use crate::game::{Question, POINTS};
pub use crate::node::{Node, Status};
pub use crate::registry::NodeIdentity;
pub use crate::replica::GameState;
