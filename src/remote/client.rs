use super::types::{
    AlgorithmChangeRequest, DeviceRegistration, ProcessImageRequest, ProcessImageResponse,
    RegisterResponse, RemoteStatus,
};
use crate::detection::Algorithm;
use crate::error::{FailureKind, PillocamError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, trace};

/// Operations the client needs from the analysis service
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// `GET /`; any 2xx counts as alive
    async fn probe(&self) -> Result<()>;

    async fn status(&self) -> Result<RemoteStatus>;

    async fn process_image(&self, request: ProcessImageRequest) -> Result<ProcessImageResponse>;

    async fn change_algorithm(&self, algorithm: Algorithm) -> Result<()>;

    async fn register_device(&self, registration: DeviceRegistration) -> Result<RegisterResponse>;
}

/// reqwest-backed [`AnalysisService`]
#[derive(Clone)]
pub struct HttpAnalysisClient {
    http: Client,
    base: Url,
}

impl HttpAnalysisClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            PillocamError::system(format!("invalid service URL '{}': {}", base_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| PillocamError::system(format!("invalid endpoint '{}': {}", path, e)))
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PillocamError::remote(
            FailureKind::RemoteProcessingError,
            format!("HTTP {}: {}", status, body.trim()),
        ))
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        response.json::<T>().await.map_err(|e| {
            if e.is_decode() {
                PillocamError::remote(
                    FailureKind::RemoteProcessingError,
                    format!("malformed response: {}", e),
                )
            } else {
                PillocamError::Http(e)
            }
        })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn probe(&self) -> Result<()> {
        let response = self.http.get(self.base.clone()).send().await?;
        Self::check(response).await?;
        trace!("Probe of {} succeeded", self.base);
        Ok(())
    }

    async fn status(&self) -> Result<RemoteStatus> {
        let response = self.http.get(self.endpoint("api/status")?).send().await?;
        Self::decode(Self::check(response).await?).await
    }

    async fn process_image(&self, request: ProcessImageRequest) -> Result<ProcessImageResponse> {
        debug!(
            algorithm = %request.algorithm,
            bytes = request.image_data.len(),
            "Submitting frame for analysis"
        );
        let response = self
            .http
            .post(self.endpoint("api/process-image")?)
            .json(&request)
            .send()
            .await?;
        Self::decode(Self::check(response).await?).await
    }

    async fn change_algorithm(&self, algorithm: Algorithm) -> Result<()> {
        let body = AlgorithmChangeRequest {
            algorithm: algorithm.as_str().to_string(),
        };
        let response = self
            .http
            .post(self.endpoint("api/algorithm/change")?)
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn register_device(&self, registration: DeviceRegistration) -> Result<RegisterResponse> {
        let response = self
            .http
            .post(self.endpoint("api/device/register")?)
            .json(&registration)
            .send()
            .await?;
        Self::decode(Self::check(response).await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_keep_base_path() {
        let client =
            HttpAnalysisClient::new("http://host:8000/pillo", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("api/status").unwrap().as_str(),
            "http://host:8000/pillo/api/status"
        );

        let client = HttpAnalysisClient::new("http://host:8000", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.endpoint("api/process-image").unwrap().as_str(),
            "http://host:8000/api/process-image"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        assert!(HttpAnalysisClient::new("::not-a-url", Duration::from_secs(1)).is_err());
    }
}
