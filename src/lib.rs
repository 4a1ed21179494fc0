//! Multi-user blog backend.
//!
//! The heart of the crate is [`context`]: every request flows through a
//! `RequestContextManager` that acquires a database connection, optionally
//! resolves the caller's session and account, and hands the handler a
//! `RequestContext` whose terminal methods guarantee exactly one connection
//! release and exactly one delivered outcome per request.

pub mod config;
pub mod context;
pub mod cookie;
pub mod db;
pub mod error;
pub mod handlers;
pub mod model;
pub mod security;
pub mod server;
pub mod session;
pub mod store;

/// Prints to stderr in test and debug builds; compiles to nothing (while still
/// type-checking the format arguments) in release builds.
#[macro_export]
macro_rules! tprintln {
    ($($arg:tt)*) => {
        if cfg!(any(test, debug_assertions)) {
            eprintln!($($arg)*);
        }
    };
}
