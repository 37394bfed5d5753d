//! Types shared by every oxwatch crate: signal samples, alarm levels,
//! time periods and event id generation.

pub mod id;
pub mod time;
pub mod types;
