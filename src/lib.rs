//! Fanlink — serial temperature polling between a fan controller and its
//! sensor units.
//!
//! This crate provides both ends of a point-to-point polling protocol: a
//! master that round-robins `POLL` requests over multiplexed half-duplex
//! serial channels, and a daemon that answers each `POLL` with the local
//! CPU and NVMe temperatures. The protocol core (`protocol`) is transport
//! agnostic and fully unit-tested against scripted channels; the CLI layer
//! (`cli`) wires it to real serial ports.

#[doc(hidden)]
pub mod boot;
pub mod cli;
pub mod core;
pub mod protocol;
