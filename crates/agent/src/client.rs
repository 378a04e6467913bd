//! HTTP client for the coordinator API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use peerstash_common::{
    ApprovalInfo, ApproveRequest, ErrorBody, HealthResponse, NodeInfo, Offer, PendingRequest,
    RegisterRequest, RejectRequest, ReservationView, ReserveRequest, ReserveResponse,
    SendFileRequest, StatusResponse, NODE_ID_HEADER,
};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Connection, timeout or decoding failure.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The coordinator answered with an error body.
    #[error("{status}: {kind}: {message}")]
    Api {
        status: StatusCode,
        kind: String,
        message: String,
        retryable: bool,
    },
}

impl ClientError {
    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Http(e) => !e.is_decode() && !e.is_builder(),
            ClientError::Api { retryable, .. } => *retryable,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::Api { kind, .. } => Some(kind),
            ClientError::Http(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Clone)]
pub struct CoordinatorClient {
    base: String,
    client: Client,
}

impl CoordinatorClient {
    pub fn new(base: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn register(&self, id: &str, endpoint: &str, available_space: i64) -> Result<()> {
        let body = RegisterRequest {
            id: id.to_string(),
            endpoint: endpoint.to_string(),
            available_space,
        };
        self.post::<_, StatusResponse>("/register", &body).await?;
        Ok(())
    }

    pub async fn node(&self, id: &str) -> Result<NodeInfo> {
        self.fetch(self.client.get(self.url(&format!("/nodes/{id}"))))
            .await
    }

    pub async fn offers(&self, min_space: i64) -> Result<Vec<Offer>> {
        let req = self
            .client
            .get(self.url("/offers"))
            .query(&[("min_space", min_space)]);
        self.fetch(req).await
    }

    pub async fn reserve(&self, from_id: &str, to_id: &str, amount: i64) -> Result<String> {
        let body = ReserveRequest {
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            amount,
        };
        let resp: ReserveResponse = self.post("/reserve", &body).await?;
        Ok(resp.reservation_id)
    }

    pub async fn reservation(&self, id: &str) -> Result<ReservationView> {
        self.fetch(self.client.get(self.url(&format!("/reservations/{id}"))))
            .await
    }

    /// Requester poll. `NotApproved` comes back as an `Api` error with kind
    /// `not_approved`.
    pub async fn poll(&self, reservation_id: &str, requester: &str) -> Result<ApprovalInfo> {
        let req = self
            .client
            .get(self.url(&format!("/requests/{reservation_id}")))
            .query(&[("requester", requester)]);
        self.fetch(req).await
    }

    pub async fn pending(&self, node_id: &str) -> Result<Vec<PendingRequest>> {
        let req = self
            .client
            .get(self.url("/requests"))
            .query(&[("for", node_id)])
            .header(NODE_ID_HEADER, node_id);
        self.fetch(req).await
    }

    pub async fn approve(&self, reservation_id: &str, port: i64, owner_id: &str) -> Result<()> {
        let body = ApproveRequest {
            reservation_id: reservation_id.to_string(),
            port,
            owner_id: Some(owner_id.to_string()),
        };
        self.post_as::<_, StatusResponse>(owner_id, "/approve", &body)
            .await?;
        Ok(())
    }

    pub async fn reject(&self, reservation_id: &str, owner_id: &str) -> Result<()> {
        let body = RejectRequest {
            reservation_id: reservation_id.to_string(),
            owner_id: Some(owner_id.to_string()),
        };
        self.post_as::<_, StatusResponse>(owner_id, "/reject", &body)
            .await?;
        Ok(())
    }

    /// `file_path` is resolved by the coordinator inside its transfer root.
    pub async fn send_file(
        &self,
        reservation_id: &str,
        client_id: &str,
        port: i64,
        file_path: &str,
    ) -> Result<String> {
        let body = SendFileRequest {
            reservation_id: reservation_id.to_string(),
            client_id: client_id.to_string(),
            port,
            file_path: file_path.to_string(),
        };
        let resp: StatusResponse = self.post("/send_file", &body).await?;
        Ok(resp.status)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.fetch(self.client.get(self.url("/health"))).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        self.fetch(self.client.post(self.url(path)).json(body)).await
    }

    async fn post_as<B: Serialize, T: DeserializeOwned>(
        &self,
        node_id: &str,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let req = self
            .client
            .post(self.url(path))
            .header(NODE_ID_HEADER, node_id)
            .json(body);
        self.fetch(req).await
    }

    async fn fetch<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json::<T>().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => ClientError::Api {
                status,
                kind: body.error,
                message: body.message,
                retryable: body.retryable,
            },
            Err(_) => ClientError::Api {
                status,
                kind: "unknown".to_string(),
                message: text,
                retryable: status.is_server_error(),
            },
        })
    }
}
