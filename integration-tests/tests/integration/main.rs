//! End-to-end coverage of the relay's session lifecycle, run against a
//! real `RelayServer` bound to an OS-assigned loopback port.

mod agent_flap;
mod backpressure_skip;
mod happy_path;
mod parallel_accept;
mod regional_clipping;
mod support;
mod unattended_failure;
