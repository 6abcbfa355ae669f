//! Session lifecycle and progress orchestration.
//!
//! The controller owns every piece of mutable client state. UI/CLI layers send it
//! commands (or call it directly in text mode) and render the events it emits.

mod controller;
mod poller;

pub(crate) use controller::{run_controller, SessionController, UiCommand};
pub(crate) use poller::PollTick;
