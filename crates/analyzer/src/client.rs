//! Remote inference endpoint client
//!
//! Talks to a model server over the KServe v2 REST protocol. Structured
//! inputs are sent as flat FP32 JSON tensors; encoded (binary) inputs use the
//! binary-data extension, where the JSON header is followed by the raw bytes
//! and its length is announced in `Inference-Header-Content-Length`.

use crate::config::InferenceConfig;
use crate::frame::TensorMap;
use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

const BINARY_HEADER_LENGTH: &str = "Inference-Header-Content-Length";

/// Error type for remote inference calls
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request did not complete within the configured timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The endpoint refused or could not accept a connection
    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    /// Any other transport-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint does not serve the requested model/version
    #[error("Model '{0}' not found on the endpoint")]
    ModelNotFound(String),

    /// The endpoint rejected the request as invalid
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The endpoint failed or is overloaded
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The response body could not be interpreted
    #[error("Malformed response: {0}")]
    Decode(String),

    /// The frame could not be turned into a request input
    #[error("Failed to encode input: {0}")]
    Encode(String),
}

impl ClientError {
    /// Whether retrying the same request elsewhere can never succeed
    ///
    /// Fatal errors point at configuration problems (wrong address, wrong
    /// model, wrong input layout) and make the executor raise its abort signal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Unreachable(_)
                | ClientError::ModelNotFound(_)
                | ClientError::Rejected { .. }
                | ClientError::Encode(_)
        )
    }
}

/// One named model input
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceInput {
    /// Dense tensor sent as FP32 values
    Tensor(ArrayD<f32>),
    /// Encoded bytes (e.g. JPEG) sent through the binary extension
    Encoded(Vec<u8>),
}

pub type InputMap = HashMap<String, InferenceInput>;

/// The remote procedure executors call
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run one synchronous prediction against the configured model
    async fn predict(&self, inputs: InputMap) -> Result<TensorMap, ClientError>;

    /// Ask the endpoint whether the configured model is loaded
    async fn model_ready(&self) -> Result<bool, ClientError>;
}

#[derive(Debug, Serialize)]
struct InferRequest<'a> {
    inputs: Vec<RequestTensor<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestTensor<'a> {
    name: &'a str,
    shape: Vec<usize>,
    datatype: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<TensorParameters>,
}

#[derive(Debug, Serialize)]
struct TensorParameters {
    binary_data_size: usize,
}

#[derive(Debug, Deserialize)]
struct InferResponse {
    outputs: Vec<ResponseTensor>,
}

#[derive(Debug, Deserialize)]
struct ResponseTensor {
    name: String,
    shape: Vec<usize>,
    data: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Encoded request ready to be posted
#[derive(Debug)]
struct RequestBody {
    bytes: Vec<u8>,
    /// Length of the JSON header when binary data follows it
    binary_header_len: Option<usize>,
}

fn encode_request(inputs: &InputMap) -> Result<RequestBody, ClientError> {
    let mut named: Vec<(&String, &InferenceInput)> = inputs.iter().collect();
    named.sort_by(|a, b| a.0.cmp(b.0));

    let mut tensors = Vec::with_capacity(named.len());
    let mut binary = Vec::new();
    for (name, input) in named {
        match input {
            InferenceInput::Tensor(array) => tensors.push(RequestTensor {
                name,
                shape: array.shape().to_vec(),
                datatype: "FP32",
                data: Some(array.iter().copied().collect()),
                parameters: None,
            }),
            InferenceInput::Encoded(bytes) => {
                tensors.push(RequestTensor {
                    name,
                    shape: vec![1],
                    datatype: "BYTES",
                    data: None,
                    parameters: Some(TensorParameters {
                        binary_data_size: bytes.len(),
                    }),
                });
                binary.extend_from_slice(bytes);
            }
        }
    }

    let mut bytes = serde_json::to_vec(&InferRequest { inputs: tensors })
        .map_err(|e| ClientError::Encode(e.to_string()))?;
    if binary.is_empty() {
        return Ok(RequestBody {
            bytes,
            binary_header_len: None,
        });
    }
    let header_len = bytes.len();
    bytes.extend_from_slice(&binary);
    Ok(RequestBody {
        bytes,
        binary_header_len: Some(header_len),
    })
}

fn decode_response(body: &[u8]) -> Result<TensorMap, ClientError> {
    let response: InferResponse =
        serde_json::from_slice(body).map_err(|e| ClientError::Decode(e.to_string()))?;
    response
        .outputs
        .into_iter()
        .map(|tensor| {
            let values: Vec<f32> = tensor.data.into_iter().map(|v| v as f32).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&tensor.shape), values).map_err(|e| {
                ClientError::Decode(format!("output '{}': {}", tensor.name, e))
            })?;
            Ok((tensor.name, array))
        })
        .collect()
}

/// HTTP client for a KServe v2 compatible model server
#[derive(Debug, Clone)]
pub struct KServeClient {
    http: reqwest::Client,
    endpoint: String,
    model_name: String,
    model_version: u64,
    timeout: Duration,
}

impl KServeClient {
    /// Create a client for one model
    ///
    /// `model_version` 0 addresses the latest version the server has loaded.
    pub fn new(
        endpoint: impl Into<String>,
        model_name: impl Into<String>,
        model_version: u64,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_name: model_name.into(),
            model_version,
            timeout,
        })
    }

    pub fn from_config(cfg: &InferenceConfig) -> Result<Self, ClientError> {
        Self::new(
            cfg.endpoint.clone(),
            cfg.model_name.clone(),
            cfg.model_version,
            cfg.request_timeout(),
        )
    }

    /// Base path of the configured model (and version, if pinned)
    pub fn model_url(&self) -> String {
        if self.model_version == 0 {
            format!("{}/v2/models/{}", self.endpoint, self.model_name)
        } else {
            format!(
                "{}/v2/models/{}/versions/{}",
                self.endpoint, self.model_name, self.model_version
            )
        }
    }

    pub fn infer_url(&self) -> String {
        format!("{}/infer", self.model_url())
    }

    pub fn ready_url(&self) -> String {
        format!("{}/ready", self.model_url())
    }

    fn transport_error(&self, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else if err.is_connect() {
            ClientError::Unreachable(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }

    async fn status_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);

        if status == StatusCode::NOT_FOUND {
            ClientError::ModelNotFound(self.model_name.clone())
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            ClientError::Server {
                status: status.as_u16(),
                message,
            }
        } else {
            ClientError::Rejected {
                status: status.as_u16(),
                message,
            }
        }
    }
}

#[async_trait]
impl InferenceClient for KServeClient {
    async fn predict(&self, inputs: InputMap) -> Result<TensorMap, ClientError> {
        let body = encode_request(&inputs)?;

        let mut request = self.http.post(self.infer_url());
        request = match body.binary_header_len {
            Some(len) => request
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(BINARY_HEADER_LENGTH, len),
            None => request.header(CONTENT_TYPE, "application/json"),
        };

        let response = request
            .body(body.bytes)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            return Err(self.status_error(response).await);
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        decode_response(&bytes)
    }

    async fn model_ready(&self) -> Result<bool, ClientError> {
        let response = self
            .http
            .get(self.ready_url())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Err(ClientError::ModelNotFound(self.model_name.clone())),
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::Path;
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(endpoint: &str, version: u64) -> KServeClient {
        KServeClient::new(endpoint, "detector", version, Duration::from_secs(2)).unwrap()
    }

    fn tensor_input() -> InputMap {
        let array = ArrayD::from_shape_vec(IxDyn(&[1, 2]), vec![0.5, 1.5]).unwrap();
        HashMap::from([("image".to_string(), InferenceInput::Tensor(array))])
    }

    async fn echo_sum(Json(body): Json<Value>) -> Json<Value> {
        let sum: f64 = body["inputs"][0]["data"]
            .as_array()
            .map(|values| values.iter().filter_map(Value::as_f64).sum())
            .unwrap_or(-1.0);
        Json(json!({
            "model_name": "detector",
            "outputs": [{"name": "sum", "shape": [1], "datatype": "FP32", "data": [sum]}]
        }))
    }

    #[test]
    fn test_urls_latest_and_pinned() {
        let latest = client("http://models:8000/", 0);
        assert_eq!(latest.infer_url(), "http://models:8000/v2/models/detector/infer");
        assert_eq!(latest.ready_url(), "http://models:8000/v2/models/detector/ready");

        let pinned = client("http://models:8000", 3);
        assert_eq!(
            pinned.infer_url(),
            "http://models:8000/v2/models/detector/versions/3/infer"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(ClientError::Unreachable("refused".into()).is_fatal());
        assert!(ClientError::ModelNotFound("m".into()).is_fatal());
        assert!(ClientError::Rejected {
            status: 400,
            message: "bad shape".into()
        }
        .is_fatal());
        assert!(ClientError::Encode("channels".into()).is_fatal());

        assert!(!ClientError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!ClientError::Transport("reset".into()).is_fatal());
        assert!(!ClientError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_fatal());
        assert!(!ClientError::Decode("eof".into()).is_fatal());
    }

    #[test]
    fn test_encode_request_structured() {
        let body = encode_request(&tensor_input()).unwrap();
        assert_eq!(body.binary_header_len, None);

        let value: Value = serde_json::from_slice(&body.bytes).unwrap();
        assert_eq!(value["inputs"][0]["name"], "image");
        assert_eq!(value["inputs"][0]["datatype"], "FP32");
        assert_eq!(value["inputs"][0]["shape"], json!([1, 2]));
        assert!(value["inputs"][0].get("parameters").is_none());
    }

    #[test]
    fn test_encode_request_binary_appends_payload() {
        let inputs = HashMap::from([(
            "image".to_string(),
            InferenceInput::Encoded(vec![0xFF, 0xD8, 0xFF]),
        )]);
        let body = encode_request(&inputs).unwrap();
        let header_len = body.binary_header_len.unwrap();

        let header: Value = serde_json::from_slice(&body.bytes[..header_len]).unwrap();
        assert_eq!(header["inputs"][0]["datatype"], "BYTES");
        assert_eq!(header["inputs"][0]["parameters"]["binary_data_size"], 3);
        assert_eq!(&body.bytes[header_len..], &[0xFF, 0xD8, 0xFF]);
    }

    #[test]
    fn test_decode_response_shape_mismatch() {
        let body = br#"{"outputs":[{"name":"out","shape":[2,2],"data":[1,2,3]}]}"#;
        assert!(matches!(decode_response(body), Err(ClientError::Decode(_))));
    }

    #[tokio::test]
    async fn test_predict_structured_round_trip() {
        let app = Router::new().route("/v2/models/:name/infer", post(echo_sum));
        let endpoint = spawn_server(app).await;

        let outputs = client(&endpoint, 0).predict(tensor_input()).await.unwrap();

        let sum = &outputs["sum"];
        assert_eq!(sum.shape(), &[1]);
        assert_eq!(sum[[0]], 2.0);
    }

    #[tokio::test]
    async fn test_predict_uses_pinned_version_path() {
        let app = Router::new().route(
            "/v2/models/:name/versions/:version/infer",
            post(|Path((_, version)): Path<(String, u64)>| async move {
                Json(json!({
                    "outputs": [{"name": "version", "shape": [1], "data": [version]}]
                }))
            }),
        );
        let endpoint = spawn_server(app).await;

        let outputs = client(&endpoint, 4).predict(tensor_input()).await.unwrap();
        assert_eq!(outputs["version"][[0]], 4.0);
    }

    #[tokio::test]
    async fn test_predict_binary_sends_header_length() {
        let app = Router::new().route(
            "/v2/models/:name/infer",
            post(|headers: HeaderMap, body: Bytes| async move {
                let header_len: usize = headers[BINARY_HEADER_LENGTH]
                    .to_str()
                    .unwrap()
                    .parse()
                    .unwrap();
                let payload = body.len() - header_len;
                Json(json!({
                    "outputs": [{"name": "payload", "shape": [1], "data": [payload]}]
                }))
            }),
        );
        let endpoint = spawn_server(app).await;

        let inputs = HashMap::from([(
            "image".to_string(),
            InferenceInput::Encoded(vec![1, 2, 3, 4, 5]),
        )]);
        let outputs = client(&endpoint, 0).predict(inputs).await.unwrap();
        assert_eq!(outputs["payload"][[0]], 5.0);
    }

    #[tokio::test]
    async fn test_predict_missing_model_is_fatal() {
        let app = Router::new();
        let endpoint = spawn_server(app).await;

        let err = client(&endpoint, 0).predict(tensor_input()).await.unwrap_err();
        assert!(matches!(err, ClientError::ModelNotFound(ref m) if m == "detector"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_predict_server_error_is_transient() {
        let app = Router::new().route(
            "/v2/models/:name/infer",
            post(|| async {
                (
                    HttpStatus::SERVICE_UNAVAILABLE,
                    Json(json!({"error": "model is reloading"})),
                )
            }),
        );
        let endpoint = spawn_server(app).await;

        let err = client(&endpoint, 0).predict(tensor_input()).await.unwrap_err();
        match &err {
            ClientError::Server { status, message } => {
                assert_eq!(*status, 503);
                assert_eq!(message, "model is reloading");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_predict_bad_request_is_fatal() {
        let app = Router::new().route(
            "/v2/models/:name/infer",
            post(|| async { (HttpStatus::BAD_REQUEST, "invalid input shape") }),
        );
        let endpoint = spawn_server(app).await;

        let err = client(&endpoint, 0).predict(tensor_input()).await.unwrap_err();
        assert!(matches!(err, ClientError::Rejected { status: 400, .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_predict_unreachable_endpoint_is_fatal() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{}", addr), 0)
            .predict(tensor_input())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Unreachable(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_model_ready() {
        let app = Router::new().route("/v2/models/:name/ready", get(|| async { "" }));
        let endpoint = spawn_server(app).await;

        assert!(client(&endpoint, 0).model_ready().await.unwrap());
        assert!(matches!(
            client(&endpoint, 2).model_ready().await,
            Err(ClientError::ModelNotFound(_))
        ));
    }
}
