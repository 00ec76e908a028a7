// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Serving the endpoints of an [ApiDescriptor] with `tide`.
//!
//! A [Router] is a `tide` middleware. For every request whose method and path match one of the
//! API's endpoints, it validates the body and query against their declared schemas, runs the
//! handler registered for that operation and emits the handler's [Outcome]. When a handler returns
//! [Outcome::Skipped], the next endpoint matching the same request is tried. Requests which match
//! no endpoint, or which every matching handler skips, continue down the middleware chain, usually
//! to tide's 404 response.

use crate::api::ApiDescriptor;
use crate::descriptor::{EndpointDescriptor, Method};
use crate::error::{ContractError, Error, Target};
use crate::schema::{check, Schema, ValidationError, Violation};
use crate::template::{generic_path, match_path, PathParams};
use futures::future::{BoxFuture, Future};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tide::http::{content::Accept, mime};
use tide::{Body, Middleware, Next, Request, Response, StatusCode};
use tracing::{event, Level};

/// What a handler did with a request.
#[derive(Debug)]
pub enum Outcome {
    /// Respond with 200 and this value as the body.
    Handled(Value),
    /// Respond with a response the handler built itself.
    Responded(Response),
    /// Do not handle this request; pass it on to the next handler.
    Skipped,
}

impl Outcome {
    pub fn json<T: Serialize>(value: &T) -> tide::Result<Self> {
        Ok(Self::Handled(serde_json::to_value(value)?))
    }
}

impl From<Value> for Outcome {
    fn from(value: Value) -> Self {
        Self::Handled(value)
    }
}

/// A request which has passed schema validation.
#[derive(Clone, Debug)]
pub struct HandlerRequest<State> {
    operation: String,
    method: Method,
    path: String,
    params: PathParams,
    query: Map<String, Value>,
    body: Option<Value>,
    headers: BTreeMap<String, String>,
    state: State,
}

impl<State> HandlerRequest<State> {
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// The path of the request, relative to where the router is mounted.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub fn query(&self) -> &Map<String, Value> {
        &self.query
    }

    pub fn query_value(&self, name: &str) -> Option<&Value> {
        self.query.get(name)
    }

    /// Deserialize the whole query into `T`.
    pub fn query_as<T: DeserializeOwned>(&self) -> tide::Result<T> {
        from_request_value(Value::Object(self.query.clone()), Target::Query)
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Deserialize the body into `T`. A missing body deserializes from `null`.
    pub fn body_as<T: DeserializeOwned>(&self) -> tide::Result<T> {
        from_request_value(self.body.clone().unwrap_or(Value::Null), Target::Body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}

fn from_request_value<T: DeserializeOwned>(value: Value, target: Target) -> tide::Result<T> {
    serde_json::from_value(value).map_err(|err| {
        tide::Error::from_str(
            StatusCode::BadRequest,
            format!("unable to deserialize request {}: {}", target, err),
        )
    })
}

/// An asynchronous handler for one operation.
///
/// Implemented for every `Fn(HandlerRequest<State>) -> impl Future<Output = tide::Result<Outcome>>`.
pub trait Handler<State>: Send + Sync + 'static {
    fn call(&self, req: HandlerRequest<State>) -> BoxFuture<'static, tide::Result<Outcome>>;
}

impl<State, F, Fut> Handler<State> for F
where
    State: Send + 'static,
    F: Fn(HandlerRequest<State>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = tide::Result<Outcome>> + Send + 'static,
{
    fn call(&self, req: HandlerRequest<State>) -> BoxFuture<'static, tide::Result<Outcome>> {
        Box::pin(self(req))
    }
}

/// Handlers by operation name, as accepted by [Router::new].
pub type Handlers<State> = HashMap<String, Arc<dyn Handler<State>>>;

/// Type-erase a handler so it can be put in a [Handlers] map.
pub fn handler<State>(h: impl Handler<State>) -> Arc<dyn Handler<State>> {
    Arc::new(h)
}

struct Route<State> {
    operation: String,
    pattern: String,
    endpoint: EndpointDescriptor,
    handler: Arc<dyn Handler<State>>,
}

/// Middleware serving every operation of an API.
pub struct Router<State> {
    api: Arc<ApiDescriptor>,
    routes: Vec<Route<State>>,
}

impl<State: Clone + Send + Sync + 'static> Router<State> {
    /// Create a router from one handler per operation.
    ///
    /// Fails if an operation of `api` has no handler, or if a handler is given for an operation
    /// `api` does not define.
    pub fn new(api: Arc<ApiDescriptor>, mut handlers: Handlers<State>) -> Result<Self, ContractError> {
        let mut routes = Vec::with_capacity(api.len());
        for (operation, endpoint) in api.iter() {
            let handler =
                handlers
                    .remove(operation)
                    .ok_or_else(|| ContractError::MissingHandler {
                        operation: operation.to_string(),
                    })?;
            let pattern = generic_path(endpoint);
            event!(
                Level::INFO,
                "registering {} {} for {}",
                endpoint.http_method(),
                pattern,
                operation
            );
            routes.push(Route {
                operation: operation.to_string(),
                pattern,
                endpoint: endpoint.clone(),
                handler,
            });
        }
        if let Some(operation) = handlers.keys().min() {
            return Err(ContractError::UnknownOperation {
                operation: operation.clone(),
            });
        }
        // Literal routes win over parameterized ones, e.g. `/lists/new` over `/lists/{id}`.
        routes.sort_by_key(|route| route.endpoint.param_names().len());
        Ok(Self { api, routes })
    }

    /// Assign handlers one operation at a time.
    pub fn builder(api: Arc<ApiDescriptor>) -> RouterBuilder<State> {
        RouterBuilder {
            api,
            handlers: HashMap::new(),
            error: None,
        }
    }

    pub fn api(&self) -> &ApiDescriptor {
        &self.api
    }

    /// The registered routes as `(method, generic path, operation)`.
    pub fn routes(&self) -> impl Iterator<Item = (Method, &str, &str)> {
        self.routes.iter().map(|route| {
            (
                route.endpoint.http_method(),
                route.pattern.as_str(),
                route.operation.as_str(),
            )
        })
    }

    /// Every route matching `method` and `path`, in the order they are tried.
    fn matches(&self, method: Method, path: &str) -> Vec<(&Route<State>, PathParams)> {
        self.routes
            .iter()
            .filter(|route| route.endpoint.http_method() == method)
            .filter_map(|route| match_path(&route.endpoint, path).map(|params| (route, params)))
            .collect()
    }
}

#[tide::utils::async_trait]
impl<State: Clone + Send + Sync + 'static> Middleware<State> for Router<State> {
    async fn handle(&self, mut req: Request<State>, next: Next<'_, State>) -> tide::Result {
        let method = match Method::from_http(req.method()) {
            Some(method) => method,
            None => return Ok(next.run(req).await),
        };
        let path = req.url().path().to_string();
        let matches = self.matches(method, &path);
        if matches.is_empty() {
            return Ok(next.run(req).await);
        }
        let accept = Accept::from_headers(&req)?;

        // The body can only be read once, so it is parsed up front and shared by every match.
        let bytes = req.body_bytes().await?;
        let parsed = if bytes.is_empty() {
            None
        } else {
            Some(serde_json::from_slice::<Value>(&bytes))
        };
        let query = read_query(&req);
        let headers: BTreeMap<String, String> = req
            .iter()
            .map(|(name, values)| {
                (
                    name.as_str().to_ascii_lowercase(),
                    values.last().as_str().to_string(),
                )
            })
            .collect();

        for (route, params) in matches {
            let body = match sanitize_body(&route.endpoint, &parsed) {
                Ok(body) => body,
                Err(err) => return reject(&route.operation, err),
            };
            let query = match sanitize_query(&route.endpoint, query.clone()) {
                Ok(query) => query,
                Err(err) => return reject(&route.operation, err),
            };
            let handler_req = HandlerRequest {
                operation: route.operation.clone(),
                method,
                path: path.clone(),
                params,
                query,
                body,
                headers: headers.clone(),
                state: req.state().clone(),
            };
            match route.handler.call(handler_req).await? {
                Outcome::Handled(value) => return respond_with(&accept, &value),
                Outcome::Responded(res) => return Ok(res),
                Outcome::Skipped => {
                    event!(Level::DEBUG, "{} skipped {}", route.operation, req.url());
                }
            }
        }
        Ok(next.run(req).await)
    }
}

/// Check a parsed request body against the endpoint's body schema.
///
/// A body which is not JSON is only an error if the endpoint declares a body schema. Otherwise
/// the handler sees no body at all.
fn sanitize_body(
    endpoint: &EndpointDescriptor,
    body: &Option<serde_json::Result<Value>>,
) -> Result<Option<Value>, ContractError> {
    let schema = endpoint.body_schema();
    match (body, schema) {
        (None, _) => Ok(None),
        (Some(Err(_)), None) => Ok(None),
        (Some(Err(err)), Some(_)) => Err(ContractError::Validation {
            target: Target::Body,
            violations: vec![Violation::new("", format!("malformed JSON: {}", err))],
        }),
        (Some(Ok(body)), schema) => check(schema, body.clone())
            .map(Some)
            .map_err(|err| ContractError::Validation {
                target: Target::Body,
                violations: err.violations,
            }),
    }
}

/// Collect the query string. Every value is a string; repeated keys become arrays.
fn read_query<State>(req: &Request<State>) -> Map<String, Value> {
    let mut query = Map::new();
    for (name, value) in req.url().query_pairs() {
        let value = Value::String(value.into_owned());
        match query.get_mut(&*name) {
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                query.insert(name.into_owned(), value);
            }
        }
    }
    query
}

/// Check each declared query parameter against its schema.
///
/// Declared parameters which are absent are checked as `null`. A string which fails its schema
/// is checked again as JSON, so `?page=2` satisfies a schema expecting a number.
fn sanitize_query(
    endpoint: &EndpointDescriptor,
    mut query: Map<String, Value>,
) -> Result<Map<String, Value>, ContractError> {
    let schema = match endpoint.query_schema() {
        Some(schema) => schema,
        None => return Ok(query),
    };
    let mut violations = Vec::new();
    for (name, param_schema) in schema {
        let value = query.get(name).cloned().unwrap_or(Value::Null);
        match check_query_value(param_schema, value) {
            Ok(Value::Null) if !query.contains_key(name) => {}
            Ok(value) => {
                query.insert(name.clone(), value);
            }
            Err(err) => violations.extend(err.nested(name).violations),
        }
    }
    if violations.is_empty() {
        Ok(query)
    } else {
        Err(ContractError::Validation {
            target: Target::Query,
            violations,
        })
    }
}

fn check_query_value(schema: &Schema, value: Value) -> Result<Value, ValidationError> {
    let err = match check(Some(schema), value.clone()) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };
    match value {
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed) => check(Some(schema), parsed).map_err(|_| err),
            Err(_) => Err(err),
        },
        _ => Err(err),
    }
}

fn reject(operation: &str, err: ContractError) -> tide::Result {
    event!(Level::WARN, "rejecting request to {}: {}", operation, err);
    Ok(Response::builder(err.status())
        .body(Body::from_json(&err)?)
        .content_type(mime::JSON)
        .build())
}

/// Assigns handlers to the operations of an API one at a time.
///
/// Errors are reported by [RouterBuilder::build]: assigning an operation twice, assigning an
/// operation the API does not define, or leaving an operation without a handler.
pub struct RouterBuilder<State> {
    api: Arc<ApiDescriptor>,
    handlers: Handlers<State>,
    error: Option<ContractError>,
}

impl<State: Clone + Send + Sync + 'static> RouterBuilder<State> {
    pub fn handle(mut self, operation: &str, h: impl Handler<State>) -> Self {
        if self.error.is_some() {
            return self;
        }
        if !self.api.contains(operation) {
            self.error = Some(ContractError::UnknownOperation {
                operation: operation.to_string(),
            });
        } else if self.handlers.contains_key(operation) {
            self.error = Some(ContractError::DuplicateHandler {
                operation: operation.to_string(),
            });
        } else {
            self.handlers.insert(operation.to_string(), handler(h));
        }
        self
    }

    /// Operations which do not have a handler yet, in name order.
    pub fn remaining(&self) -> Vec<&str> {
        self.api
            .operations()
            .filter(|op| !self.handlers.contains_key(*op))
            .collect()
    }

    pub fn build(self) -> Result<Router<State>, ContractError> {
        match self.error {
            Some(err) => Err(err),
            None => Router::new(self.api, self.handlers),
        }
    }
}

/// Whether a response encoded as JSON is acceptable to the client.
///
/// `Accept::negotiate` only matches `*` literally, so `*/*` and `application/*` are checked here.
fn accepts_json(accept: &Option<Accept>) -> bool {
    match accept {
        Some(accept) => {
            accept.wildcard()
                || accept.iter().any(|proposed| {
                    proposed.basetype() == "*"
                        || (proposed.basetype() == mime::JSON.basetype()
                            && (proposed.subtype() == "*"
                                || proposed.subtype() == mime::JSON.subtype()))
                })
        }
        None => true,
    }
}

fn respond_with<T: Serialize>(accept: &Option<Accept>, body: &T) -> tide::Result {
    if !accepts_json(accept) {
        return Err(tide::Error::from_str(
            StatusCode::NotAcceptable,
            "No suitable Content-Type found",
        ));
    }
    Ok(Response::builder(StatusCode::Ok)
        .body(Body::from_json(body)?)
        .content_type(mime::JSON)
        .build())
}

/// Server middleware which automatically populates the body of error responses.
///
/// If the response contains an error, the error is encoded into `E` (either by downcasting if
/// the server has generated an instance of `E`, or by converting to a [String] using
/// [Display](std::fmt::Display) if it can not be downcast). The resulting error is serialized
/// and used as the body of the response, with the status code of the error.
///
/// If the response does not contain an error, it is passed through unchanged. Use
/// [ClientError::api_error](crate::client::ClientError::api_error) on the client to recover `E`.
pub fn add_error_body<'a, T: Clone + Send + Sync + 'static, E: Error>(
    req: Request<T>,
    next: Next<'a, T>,
) -> BoxFuture<'a, tide::Result> {
    Box::pin(async {
        let accept = Accept::from_headers(&req)?;
        let mut res = next.run(req).await;
        if let Some(error) = res.take_error() {
            let error = E::from_client_error(error);
            event!(Level::WARN, "responding with error: {}", error);
            let mut res = respond_with(&accept, &error)?;
            res.set_status(error.status());
            Ok(res)
        } else {
            Ok(res)
        }
    })
}

/// Server middleware which logs requests and responses.
pub fn trace<'a, T: Clone + Send + Sync + 'static>(
    req: Request<T>,
    next: Next<'a, T>,
) -> BoxFuture<'a, tide::Result> {
    Box::pin(async {
        event!(
            Level::INFO,
            "<-- received request {{method: {}, url: {}, content-type: {:?}}}",
            req.method(),
            req.url(),
            req.content_type(),
        );
        let res = next.run(req).await;
        event!(
            Level::INFO,
            "--> responding with {{status: {}, error: {:?}}}",
            res.status(),
            res.error(),
        );
        Ok(res)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{delete, get, post, put};
    use serde_json::json;
    use tide::http::Mime;

    fn api() -> Arc<ApiDescriptor> {
        Arc::new(
            ApiDescriptor::builder()
                .endpoint("version", get("/version"))
                .endpoint("createList", post("/lists"))
                .endpoint("getList", get("/lists/{id}"))
                .endpoint("newList", get("/lists/new"))
                .endpoint("moveTodo", put("/todos/{todoId}/moveTo/{listId}"))
                .build()
                .unwrap(),
        )
    }

    async fn ok(_req: HandlerRequest<()>) -> tide::Result<Outcome> {
        Outcome::json(&"OK")
    }

    fn all_handlers() -> Handlers<()> {
        ["version", "createList", "getList", "newList", "moveTodo"]
            .iter()
            .map(|op| (op.to_string(), handler(ok)))
            .collect()
    }

    #[test]
    fn registers_generic_paths() {
        let router = Router::new(api(), all_handlers()).unwrap();
        let routes = router.routes().collect::<Vec<_>>();
        assert_eq!(routes.len(), 5);
        assert!(routes.contains(&(Method::Put, "/todos/:todoId/moveTo/:listId", "moveTodo")));
        assert!(routes.contains(&(Method::Get, "/lists/:id", "getList")));
    }

    #[test]
    fn literal_routes_are_tried_first() {
        let router = Router::new(api(), all_handlers()).unwrap();
        let matches = router.matches(Method::Get, "/lists/new");
        let operations = matches
            .iter()
            .map(|(route, _)| route.operation.as_str())
            .collect::<Vec<_>>();
        assert_eq!(operations, vec!["newList", "getList"]);
        assert!(matches[0].1.is_empty());
        assert_eq!(matches[1].1.get("id").map(String::as_str), Some("new"));

        let matches = router.matches(Method::Get, "/lists/7");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0.operation, "getList");
        assert!(router.matches(Method::Delete, "/lists/7").is_empty());
    }

    #[test]
    fn body_without_schema_need_not_be_json() {
        let endpoint = delete("/lists/{id}");
        let garbage = Some(serde_json::from_str::<Value>("hello"));
        assert_eq!(sanitize_body(&endpoint, &garbage), Ok(None));

        let endpoint = endpoint.body(Schema::example(json!({})));
        let garbage = Some(serde_json::from_str::<Value>("hello"));
        match sanitize_body(&endpoint, &garbage) {
            Err(ContractError::Validation { target, .. }) => assert_eq!(target, Target::Body),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn query_strings_are_retried_as_json() {
        let endpoint = get("/lists").query_param("page", Schema::typed::<u32>());
        let mut query = Map::new();
        query.insert("page".into(), json!("2"));
        let query = sanitize_query(&endpoint, query).unwrap();
        assert_eq!(query["page"], json!(2));

        let mut query = Map::new();
        query.insert("page".into(), json!("two"));
        match sanitize_query(&endpoint, query) {
            Err(ContractError::Validation { target, violations }) => {
                assert_eq!(target, Target::Query);
                assert_eq!(violations[0].path, "/page");
            }
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn missing_handler_fails_construction() {
        let mut handlers = all_handlers();
        handlers.remove("moveTodo");
        assert_eq!(
            Router::new(api(), handlers).err(),
            Some(ContractError::MissingHandler {
                operation: "moveTodo".into()
            })
        );
    }

    #[test]
    fn unknown_handler_fails_construction() {
        let mut handlers = all_handlers();
        handlers.insert("deleteEverything".into(), handler(ok));
        assert_eq!(
            Router::new(api(), handlers).err(),
            Some(ContractError::UnknownOperation {
                operation: "deleteEverything".into()
            })
        );
    }

    #[test]
    fn builder_tracks_remaining_operations() {
        let builder = Router::<()>::builder(api())
            .handle("version", ok)
            .handle("createList", ok);
        assert_eq!(builder.remaining(), vec!["getList", "moveTodo", "newList"]);
        assert_eq!(
            builder.build().err(),
            Some(ContractError::MissingHandler {
                operation: "getList".into()
            })
        );
    }

    #[test]
    fn builder_rejects_duplicates() {
        let err = Router::<()>::builder(api())
            .handle("version", ok)
            .handle("version", ok)
            .build()
            .err();
        assert_eq!(
            err,
            Some(ContractError::DuplicateHandler {
                operation: "version".into()
            })
        );
    }

    #[test]
    fn builder_accepts_complete_assignment() {
        let router = Router::<()>::builder(api())
            .handle("version", ok)
            .handle("createList", ok)
            .handle("getList", ok)
            .handle("newList", ok)
            .handle("moveTodo", ok)
            .build()
            .unwrap();
        assert_eq!(router.routes().count(), 5);
    }

    #[test]
    fn json_is_acceptable_unless_excluded() {
        assert!(accepts_json(&None));

        let mut accept = Accept::new();
        accept.push(mime::JSON);
        assert!(accepts_json(&Some(accept)));

        let mut accept = Accept::new();
        accept.push(mime::HTML);
        assert!(!accepts_json(&Some(accept)));

        let mut accept = Accept::new();
        accept.push(mime::HTML);
        accept.set_wildcard(true);
        assert!(accepts_json(&Some(accept)));

        let mut accept = Accept::new();
        accept.push("application/*".parse::<Mime>().unwrap());
        assert!(accepts_json(&Some(accept)));
    }
}
