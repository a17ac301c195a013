//! Client side of the remote image-analysis service.

mod client;
mod mock;
mod types;

pub use client::{AnalysisService, HttpAnalysisClient};
pub use mock::{StubAnalysisService, StubReply};
pub use types::{
    AlgorithmChangeRequest, DeviceRegistration, ProcessImageRequest, ProcessImageResponse,
    RegisterResponse, RemoteStatus,
};
