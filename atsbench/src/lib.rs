// This module contains the definition of `Config`.
pub mod config;

// This module contains the measurement domain types.
pub mod measurement;

// This module contains the client frame vocabulary.
pub mod protocol;

// This module contains the runner: controller, workers, batcher, persistence
// pipeline and sessions.
pub mod run;

// This module contains the instrument gateway.
pub mod scpi;

// This module contains the storage adapter and its implementations.
pub mod store;

// This module contains the definition of `SysTime`.
pub mod time;

// Re-exports.
pub use config::Config;

pub use hashbrown::{HashMap, HashSet};

// Re-exports of the `tracing` macros used throughout the crate.
pub use tracing::{debug, info, trace, warn};
