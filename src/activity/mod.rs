//! Activity tracking for the water quality dashboard.
//!
//! Records fetch outcomes and exports so operators can tell whether the
//! upstream API is being reached.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, ActivityLog, ActivityStats,
    SharedActivityLog,
};
