//! Client-side controller for a server-executed music download job.
//!
//! The server does the actual downloading; this crate drives it: start, stop
//! and retry commands go out over HTTP, lifecycle and progress come back on a
//! long-lived one-way event stream.  [`session`] owns the job lifecycle,
//! [`controller`] runs the single-owner event loop that everything else
//! feeds into, and [`projection`] derives what a UI may enable at any moment.

pub mod catalog;
pub mod controller;
pub mod jobs;
pub mod projection;
pub mod session;
pub mod sink;
pub mod stream;
