//! Network-facing protection
//!
//! Flood governors gate inbound packets per connection; the punishment
//! sink carries escalations (bans, jails) out to enforcement.

pub mod flood;
pub mod punish;
