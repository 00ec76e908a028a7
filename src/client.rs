// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Calling the endpoints of an [ApiDescriptor] over `surf`.
//!
//! A [Consumer] binds an API description to an HTTP client and exposes one [Operation] per
//! endpoint. Outgoing query parameters and bodies are not checked against their schemas; the
//! server is responsible for rejecting bad input with a 400.

use crate::api::ApiDescriptor;
use crate::descriptor::EndpointDescriptor;
use crate::error::{client_error, ContractError, Error};
use crate::template::{concrete_path, PathParams};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use snafu::Snafu;
use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use surf::http::headers::HeaderName;
use surf::{Client, RequestBuilder, Response, StatusCode, Url};
use tracing::{event, Level};

#[derive(Debug, Snafu)]
pub enum ClientError {
    #[snafu(display("{}", source))]
    Contract { source: ContractError },

    #[snafu(display("invalid URL {}: {}", url, message))]
    InvalidUrl { url: String, message: String },

    #[snafu(display("invalid request {}: {}", what, message))]
    Encode { what: String, message: String },

    #[snafu(display("request failed: {}", error))]
    Transport { error: surf::Error },

    #[snafu(display("request failed with status code {}", status))]
    Status { status: StatusCode, body: Value },

    #[snafu(display("response body fails to deserialize: {}", message))]
    Decode { message: String },
}

impl ClientError {
    /// The status code of a response which was not successful.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Recover the server's error from the body of an unsuccessful response.
    ///
    /// Returns `None` if there was no response, or if its body is not a serialized `E`.
    pub fn api_error<E: Error>(&self) -> Option<E> {
        match self {
            Self::Status { body, .. } => serde_json::from_value(body.clone()).ok(),
            _ => None,
        }
    }
}

impl From<ContractError> for ClientError {
    fn from(source: ContractError) -> Self {
        Self::Contract { source }
    }
}

/// Settings for the HTTP client behind a [Consumer].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Option<Duration>,
    pub headers: BTreeMap<String, String>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Some(Duration::from_secs(60)),
            headers: BTreeMap::new(),
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    fn into_client(self) -> Result<(Client, Url), ClientError> {
        let base_url = parse_url(&self.base_url)?;
        let mut config = surf::Config::new().set_timeout(self.timeout);
        for (name, value) in &self.headers {
            config = config
                .add_header(parse_header_name(name)?, value.as_str())
                .map_err(|err| ClientError::Encode {
                    what: format!("header {}", name),
                    message: err.to_string(),
                })?;
        }
        let client = Client::try_from(config).map_err(|err| ClientError::Encode {
            what: "client configuration".into(),
            message: err.to_string(),
        })?;
        Ok((client, base_url))
    }
}

/// Arguments to a single call.
///
/// `params` fills the path parameters, `query` becomes the query string and `body` is sent as
/// JSON. `headers` are passed to the HTTP client unchanged. `timeout` bounds the wait for the
/// response, on top of any timeout in the consumer's [ClientConfig].
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    pub params: Option<PathParams>,
    pub query: Option<Map<String, Value>>,
    pub body: Option<Value>,
    pub headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params
            .get_or_insert_with(PathParams::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<Value>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `body` with serde and send it as the request body.
    pub fn json_body<T: serde::Serialize>(self, body: &T) -> Result<Self, ClientError> {
        let body = serde_json::to_value(body).map_err(|err| ClientError::Encode {
            what: "body".into(),
            message: err.to_string(),
        })?;
        Ok(self.body(body))
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A complete response: status, headers and decoded body.
#[derive(Clone, Debug)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl ApiResponse {
    /// Deserialize the body into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        serde_json::from_value(self.body.clone()).map_err(|err| ClientError::Decode {
            message: err.to_string(),
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Client for every operation of an API.
///
/// A `Consumer` holds no mutable state, so clones can be used from any number of tasks.
#[derive(Clone)]
pub struct Consumer {
    api: Arc<ApiDescriptor>,
    client: Client,
    base_url: Url,
}

impl Consumer {
    pub fn new(api: Arc<ApiDescriptor>, config: ClientConfig) -> Result<Self, ClientError> {
        let (client, base_url) = config.into_client()?;
        Ok(Self {
            api,
            client,
            base_url,
        })
    }

    /// Use an already configured `surf` client, e.g. one backed by an in-process server.
    pub fn with_client(
        api: Arc<ApiDescriptor>,
        client: Client,
        base_url: &str,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            api,
            client,
            base_url: parse_url(base_url)?,
        })
    }

    pub fn api(&self) -> &ApiDescriptor {
        &self.api
    }

    pub fn operation(&self, name: &str) -> Result<Operation<'_>, ClientError> {
        let (name, endpoint) = self
            .api
            .iter()
            .find(|(op, _)| *op == name)
            .ok_or_else(|| ContractError::UnknownOperation {
                operation: name.to_string(),
            })?;
        Ok(Operation {
            consumer: self,
            name,
            endpoint,
        })
    }

    /// One callable per operation, in name order.
    pub fn operations(&self) -> impl Iterator<Item = Operation<'_>> {
        self.api.iter().map(move |(name, endpoint)| Operation {
            consumer: self,
            name,
            endpoint,
        })
    }

    pub async fn call(&self, name: &str, options: CallOptions) -> Result<ApiResponse, ClientError> {
        self.operation(name)?.call(options).await
    }

    fn url_for(&self, path: &str, query: Option<&Map<String, Value>>) -> Result<Url, ClientError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = parse_url(&format!("{}{}", base, path))?;
        if let Some(query) = query {
            let pairs = query_pairs(query);
            if !pairs.is_empty() {
                let mut serializer = url.query_pairs_mut();
                for (name, value) in &pairs {
                    serializer.append_pair(name, value);
                }
            }
        }
        Ok(url)
    }
}

/// A callable bound to one endpoint of a [Consumer].
#[derive(Clone, Copy)]
pub struct Operation<'a> {
    consumer: &'a Consumer,
    name: &'a str,
    endpoint: &'a EndpointDescriptor,
}

impl<'a> Operation<'a> {
    pub fn name(&self) -> &'a str {
        self.name
    }

    pub fn endpoint(&self) -> &'a EndpointDescriptor {
        self.endpoint
    }

    /// Issue exactly one request for this operation.
    pub async fn call(&self, options: CallOptions) -> Result<ApiResponse, ClientError> {
        let path = concrete_path(self.endpoint, options.params.as_ref())?;
        let url = self.consumer.url_for(&path, options.query.as_ref())?;
        let method = self.endpoint.http_method();
        event!(Level::DEBUG, "--> {} {} ({})", method, url, self.name);

        let mut req = RequestBuilder::new(method.to_http(), url);
        for (name, value) in &options.headers {
            req = req.header(parse_header_name(name)?, value.as_str());
        }
        if let Some(body) = &options.body {
            let body = surf::Body::from_json(body).map_err(|err| ClientError::Encode {
                what: "body".into(),
                message: err.to_string(),
            })?;
            req = req.body(body);
        }

        let send = self.consumer.client.send(req);
        let res = match options.timeout {
            Some(timeout) => match async_std::future::timeout(timeout, send).await {
                Ok(res) => res,
                Err(_) => {
                    event!(Level::WARN, "{} timed out after {:?}", self.name, timeout);
                    Err(client_error::<ContractError>(ContractError::catch_all(
                        StatusCode::RequestTimeout,
                        format!("no response from {} within {:?}", self.name, timeout),
                    )))
                }
            },
            None => send.await,
        };
        response_to_result(res.map_err(|error| ClientError::Transport { error })?).await
    }
}

/// Deserialize the body of a response.
///
/// The Content-Type header is used to determine the format. An empty body decodes to `null` and
/// a `text/*` body to a JSON string.
pub async fn response_body(res: &mut Response) -> Result<Value, ClientError> {
    let bytes = res
        .body_bytes()
        .await
        .map_err(|error| ClientError::Transport { error })?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    match res.content_type() {
        Some(mime) if mime.essence() == "application/json" => serde_json::from_slice(&bytes)
            .map_err(|err| ClientError::Decode {
                message: err.to_string(),
            }),
        Some(mime) if mime.basetype() == "text" => {
            Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        }
        Some(mime) => Err(ClientError::Decode {
            message: format!("unsupported content type {}", mime),
        }),
        None => Err(ClientError::Decode {
            message: "unspecified content type in response".into(),
        }),
    }
}

/// Turn a response into an [ApiResponse], or into an error if its status is not a success.
pub async fn response_to_result(mut res: Response) -> Result<ApiResponse, ClientError> {
    let status = res.status();
    let headers = res
        .iter()
        .map(|(name, values)| {
            (
                name.as_str().to_ascii_lowercase(),
                values.last().as_str().to_string(),
            )
        })
        .collect();
    // A failed response may carry a body that is not JSON; keep the status either way.
    let body = match response_body(&mut res).await {
        Ok(body) => body,
        Err(err) if !status.is_success() => Value::String(err.to_string()),
        Err(err) => return Err(err),
    };
    if status.is_success() {
        event!(Level::DEBUG, "<-- {}", status);
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    } else {
        event!(Level::DEBUG, "<-- {}: {}", status, body);
        Err(ClientError::Status { status, body })
    }
}

fn parse_url(url: &str) -> Result<Url, ClientError> {
    Url::parse(url).map_err(|err| ClientError::InvalidUrl {
        url: url.to_string(),
        message: err.to_string(),
    })
}

fn parse_header_name(name: &str) -> Result<HeaderName, ClientError> {
    HeaderName::from_str(name).map_err(|err| ClientError::Encode {
        what: format!("header {}", name),
        message: err.to_string(),
    })
}

/// Flatten query values into string pairs.
///
/// `null` entries are left out, strings are sent as is, arrays become repeated keys and any
/// other value is sent as JSON text.
fn query_pairs(query: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (name, value) in query {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(item) = query_value(item) {
                        pairs.push((name.clone(), item));
                    }
                }
            }
            value => {
                if let Some(value) = query_value(value) {
                    pairs.push((name.clone(), value));
                }
            }
        }
    }
    pairs
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
