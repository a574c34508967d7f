#![doc = include_str!("../README.md")]

mod context;
mod encoding;
mod error;
mod generator;
mod protocol;
mod rand;
mod shard;
mod store;
mod time;

pub use crate::context::*;
pub use crate::encoding::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::protocol::*;
pub use crate::rand::*;
pub use crate::shard::*;
pub use crate::store::*;
pub use crate::time::*;
