//! Test infrastructure for floatipd
//!
//! Provides:
//! - An in-memory `ip` host ([`FakeLink`])
//! - An in-memory `iptables` nat table that renders real listing output ([`FakeIptables`])
//! - A settable desired-state source ([`MemorySource`])
//! - Fixtures and host verification helpers

pub mod fixtures;
mod iptables;
mod link;
mod source;
mod verification;

pub use fixtures::*;
pub use iptables::FakeIptables;
pub use link::{FakeLink, LinkChange};
pub use source::MemorySource;
pub use verification::*;
