//! `txnkv-server` assembles one `txnkv::replica::Replica` process from
//! CLI flags and a layered config file (spec.md §6 "CLI surface (per
//! server)"). The network transport's socket implementation stays out
//! of scope (spec.md §1 Non-goals); this crate drives the replica it
//! builds off a tick loop instead.

pub mod config;
pub mod trace;
