mod handlers;
mod server;
#[cfg(test)]
mod tests;

pub use server::{ControlServer, ServerState};
