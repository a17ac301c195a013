pub mod keyboard_input;

mod controller;
mod runtime;
mod shutdown;
mod startup;
mod types;


pub use controller::{ControlHandle, Controller};
pub use types::{ControlEvent, ShutdownReason};
