//! Small process-level helpers.

pub mod pidfile;

pub use pidfile::SessionLockGuard;
