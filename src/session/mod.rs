mod camera_session;
mod state;

pub use camera_session::{CameraSession, DeviceChange, Selection};
pub use state::{RetryState, SessionState};
