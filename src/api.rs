/// Response data structure for API calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseData {
    pub status_code: u16,
    pub body: String,
}

/// HTTP transport to the coordinator.
///
/// Implementations return whatever status the server sent; deciding what
/// counts as acknowledgement is left to the caller.
#[allow(async_fn_in_trait)]
pub trait CoordinatorApi {
    /// PUT a JSON body to `endpoint` (a path under the coordinator base URL)
    async fn put_json(&mut self, endpoint: &str, body: &[u8]) -> anyhow::Result<ResponseData>;
}

/// Build the complete URL from base URL and endpoint
pub fn build_url(base_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with('/') {
        format!("{}{}", base_url.trim_end_matches('/'), endpoint)
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), endpoint)
    }
}

#[cfg(target_os = "espidf")]
pub use esp::EspCoordinatorApi;

#[cfg(target_os = "espidf")]
mod esp {
    use anyhow::anyhow;
    use embassy_time::Duration;
    use embedded_svc::http::client::Client;
    use embedded_svc::io::{Read, Write};
    use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
    use log::{debug, error, warn};

    use super::{build_url, CoordinatorApi, ResponseData};

    const BUFFER_SIZE: usize = 1024;
    const MAX_BODY_BYTES: usize = 4096;
    const USER_AGENT: &str = "ESP32-Sensor-Node/1.0";

    /// Plain-HTTP client for the coordinator on the local network
    pub struct EspCoordinatorApi {
        base_url: String,
        timeout: Duration,
    }

    impl EspCoordinatorApi {
        pub fn new(base_url: String, timeout: Duration) -> Self {
            Self { base_url, timeout }
        }

        // A fresh connection per request; the coordinator is contacted rarely
        fn connection(&self) -> anyhow::Result<EspHttpConnection> {
            let http_config = Configuration {
                timeout: Some(std::time::Duration::from_millis(self.timeout.as_millis())),
                buffer_size: Some(BUFFER_SIZE),
                buffer_size_tx: Some(BUFFER_SIZE),
                ..Default::default()
            };

            Ok(EspHttpConnection::new(&http_config)?)
        }
    }

    impl CoordinatorApi for EspCoordinatorApi {
        async fn put_json(&mut self, endpoint: &str, body: &[u8]) -> anyhow::Result<ResponseData> {
            let url = build_url(&self.base_url, endpoint);
            debug!("PUT request to: {}", url);

            let content_length = body.len().to_string();
            let headers = [
                ("Content-Type", "application/json"),
                ("Accept", "application/json"),
                ("Content-Length", content_length.as_str()),
                ("User-Agent", USER_AGENT),
            ];

            let mut client = Client::wrap(self.connection()?);
            let mut request = client
                .put(&url, &headers)
                .map_err(|e| anyhow!("Failed to open PUT {}: {:?}", url, e))?;
            request
                .write_all(body)
                .map_err(|e| anyhow!("Failed to write request body: {:?}", e))?;

            let mut response = request
                .submit()
                .map_err(|e| anyhow!("PUT {} failed: {:?}", url, e))?;
            let status_code = response.status();
            debug!("Response status: {}", status_code);

            // Drain the body so the connection closes cleanly
            let mut buffer = [0u8; 256];
            let mut body_content = String::new();
            loop {
                match response.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if body_content.len() + n > MAX_BODY_BYTES {
                            warn!("Response body too large, truncating at {} bytes", MAX_BODY_BYTES);
                            break;
                        }
                        body_content.push_str(&String::from_utf8_lossy(&buffer[..n]));
                    }
                    Err(e) => {
                        error!("Error reading response body: {:?}", e);
                        break;
                    }
                }
            }

            Ok(ResponseData {
                status_code,
                body: body_content,
            })
        }
    }
}
