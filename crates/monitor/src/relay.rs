use async_trait::async_trait;
use bandshare_domain::{
    config::RelayConfig,
    model::{ContributorId, HttpMethod},
    services::relay::{RelayError, RelayRequest, RelayResponse, TrafficRelay},
};
use metrics::counter;
use reqwest::{Client, Method, Proxy};
use tracing::debug;

/// Header telling the tunnel gateway which contributor connection to use.
pub const CONTRIBUTOR_HEADER: &str = "x-bandshare-contributor";

/// Forwards exchanges over HTTP, optionally through the contributor tunnel
/// gateway configured as `RELAY_PROXY_URL`.
#[derive(Clone)]
pub struct HttpTrafficRelay {
    client: Client,
}

impl HttpTrafficRelay {
    pub fn new(config: &RelayConfig) -> Result<Self, RelayError> {
        let mut builder = Client::builder().timeout(config.timeout());
        if let Some(proxy) = config.proxy_url() {
            let proxy = Proxy::all(proxy).map_err(|err| RelayError::Transport(err.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| RelayError::Transport(err.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TrafficRelay for HttpTrafficRelay {
    async fn relay(
        &self,
        contributor: &ContributorId,
        request: &RelayRequest,
    ) -> Result<RelayResponse, RelayError> {
        let mut outbound = self
            .client
            .request(method_for(request.method), request.target_url.as_str())
            .header(CONTRIBUTOR_HEADER, contributor.as_str());
        for (name, value) in &request.headers {
            outbound = outbound.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            outbound = outbound.body(body.clone());
        }

        let response = outbound.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify)?;
        counter!("relay_requests_total", "status" => status_class(status)).increment(1);
        debug!(contributor = %contributor, status, bytes = body.len(), "relay response received");

        Ok(RelayResponse::from_body(status, &body))
    }
}

fn method_for(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn classify(err: reqwest::Error) -> RelayError {
    if err.is_timeout() {
        RelayError::Timeout
    } else if err.is_builder() {
        RelayError::InvalidRequest(err.to_string())
    } else {
        RelayError::Transport(err.to_string())
    }
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
