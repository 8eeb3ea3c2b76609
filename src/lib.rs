//! # vtc
//!
//! `vtc` is a scripted HTTP/1 and HTTP/2 protocol conformance and
//! fuzz-testing harness. Test scripts describe client and server fixtures,
//! synchronization barriers, and helper processes, then drive HTTP
//! exchanges line-by-line -- including deliberately malformed ones -- and
//! assert on exactly what came back over the wire.
//!
//! ## Layout
//!
//! - [`ast`] parses the scripting language into a tree of commands.
//! - [`registry`] walks that tree and dispatches each command to a fixture.
//! - [`client`] and [`server`] are the two fixture kinds a script can start.
//! - [`http1`] and [`http2`] are the two wire-level engines a connection can
//!   run, each with its own explicit, fuzz-friendly command set.
//! - [`hpack`] implements the HPACK codec the HTTP/2 engine uses.
//! - [`barrier`], [`process`], [`macro_store`], [`logging`] and [`net`] are
//!   the supporting fixture/runtime plumbing.
//! - [`runner`] ties parsing, execution, and verdict reporting together for
//!   a single test file; `vtc`, the binary, drives it over many files.

pub use crate::error::{Error, Result};

pub mod ast;
pub mod barrier;
pub mod client;
pub mod conn;
pub mod context;
mod error;
pub mod frame;
pub mod hpack;
pub mod http1;
pub mod http2;
pub mod logging;
pub mod macro_store;
pub mod net;
pub mod process;
pub mod registry;
pub mod runner;
pub mod server;
pub mod session;
