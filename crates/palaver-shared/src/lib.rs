//! # palaver-shared
//!
//! Types shared between the Palaver store and server: id newtypes, call and
//! membership status enums, pub/sub channel naming, and common constants.

pub mod channels;
pub mod constants;
pub mod error;
pub mod types;

pub use channels::ChannelName;
pub use error::SharedError;
pub use types::*;
