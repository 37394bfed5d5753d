//! Condition detection and alarm lifecycle engine.
//!
//! A [`DetectorDefinition`](definition::DetectorDefinition) describes one
//! condition on one signal. The [`registry::DetectorRegistry`] turns the
//! definitions of each active signal into
//! [`DetectorInstance`](instance::DetectorInstance)s, feeds them samples in
//! timestamp order and reports raises and clears to an
//! [`AlarmSink`](sink::AlarmSink).
//!
//! Built-in detector kinds cover state matching, analog limits with
//! hysteresis, ranges, rate of change, CUSUM drift, smoothness, staleness,
//! state change counting and plain update/change notifications.

pub mod config;
pub mod definition;
pub mod detectors;
pub mod error;
pub mod instance;
pub mod registry;
pub mod sink;
pub mod store;
pub mod window;


pub use config::EngineConfig;
pub use definition::{DetectorDefinition, DetectorKind};
pub use error::{DetectError, Result};
pub use instance::{ActiveAlarm, DetectorInstance, LifecycleState};
pub use registry::DetectorRegistry;
pub use sink::{AlarmSink, MemoryAlarmSink};
pub use store::{DefinitionStore, MemoryDefinitionStore};
