//! pgcheck-probe: database liveness and consistency probe.
//!
//! Keeps a per-instance counter in the store and checks, every cycle, that
//! what was written last is still there:
//!
//! ```text
//! ConsistencyProbe
//!   ├── start()        connect + ensure_schema, bounded startup budget
//!   ├── run_cycle()    read == expected? → write expected+1 → read == expected+1?
//!   ├── reconnect()    one bounded burst: settle, then up to N attempts
//!   └── run()          Running ⇄ Reconnecting, bursts repeat until shutdown
//! ```
//!
//! Mismatches are reported as [`ConsistencyViolation`]s and logged at error
//! level; they never stop the loop and never rewrite the expected value.
//! Store errors end the cycle and trigger a reconnect burst.

pub mod config;
pub mod error;
pub mod probe;
pub mod reconnect;
pub mod violation;

pub use config::{ProbeConfig, StartupPolicy};
pub use error::{ProbeError, ProbeResult};
pub use probe::{ConsistencyProbe, CycleReport, ProbeState, ProbeStats};
pub use reconnect::{BurstReport, ReconnectPolicy};
pub use violation::{Checkpoint, ConsistencyViolation};
