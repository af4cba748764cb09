//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Read settings → Load source → Build facade → Spawn change dispatcher
//!
//! Shutdown (shutdown.rs):
//!     Loader dropped or shutdown requested → Subscription tasks exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Stop watching and exit
//! ```
//!
//! # Design Decisions
//! - Startup is fail-fast: any source error aborts before the facade exists
//! - There is no teardown protocol for the facade itself; it lives until exit

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
