mod document;
mod error;
mod interface;
mod memory;
mod query;

pub use document::*;
pub use error::*;
pub use interface::*;
pub use memory::*;
pub use query::*;
