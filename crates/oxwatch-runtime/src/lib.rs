//! Time and task execution for the detector engine.
//!
//! [`clock`] provides the [`clock::Clock`] abstraction with a wall-clock
//! implementation that dispatches due timers onto the executor and a
//! simulated implementation that fires them synchronously. [`executor`]
//! provides the three-tier [`executor::PriorityExecutor`] with per-key
//! ordering on the high and medium tiers.

pub mod clock;
pub mod error;
pub mod executor;

pub use clock::{Clock, TimerHandle};
pub use error::{ExecutorError, Result};
pub use executor::{Job, OrderingKey, TaskDispatcher, Tier};
