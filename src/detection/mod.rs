mod detection_loop;
mod status;
#[cfg(test)]
mod tests;

pub use detection_loop::{Annotation, DetectionCompletion, DetectionFailure, DetectionLoop};
pub use status::{Algorithm, DetectionStatus};
