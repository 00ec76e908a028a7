// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

//! # Typed endpoint contracts for Espresso web APIs.
//!
//! An API is described once, as an [ApiDescriptor] mapping operation names to
//! [EndpointDescriptor]s. Each endpoint declares its method, a path template with named
//! parameters, and optional schemas for its query, body and response. The same description is
//! then handed to both sides of the wire:
//!
//! * the `client` module binds it to a `surf::Client`, giving one callable per operation which
//!   renders the concrete path, attaches the query and body and returns the full response;
//! * the `server` module turns it, together with one handler per operation, into a `tide`
//!   middleware which routes requests, rejects invalid bodies and queries with a 400 and emits
//!   whatever the handler returns.
//!
//! ```ignore
//! let api = Arc::new(
//!     ApiDescriptor::builder()
//!         .endpoint("version", get("/version").response(Schema::of::<String>()))
//!         .endpoint("createTodo", post("/list/{id}/add").body(Schema::typed::<NewTodo>()))
//!         .build()?,
//! );
//!
//! let router = Router::builder(api.clone())
//!     .handle("version", |_req: HandlerRequest<()>| async { Outcome::json(&"1") })
//!     .handle("createTodo", create_todo)
//!     .build()?;
//! let mut app = tide::new();
//! app.with(router);
//!
//! let consumer = Consumer::new(api, ClientConfig::new("http://localhost:8080"))?;
//! let res = consumer.call("version", CallOptions::new()).await?;
//! ```
//!
//! Schemas are only checked at runtime and only when they carry a validator (see the `schema`
//! module); request and response types are not inferred from the description at compile time.
//! Handlers and callers opt into static types with `HandlerRequest::body_as` and
//! `ApiResponse::json`.
//!
//! Errors which implement the [Error] trait are serialized into the body of error responses by
//! the `server::add_error_body` middleware and can be recovered on the client with
//! `ClientError::api_error`.

pub mod api;
pub mod client;
pub mod descriptor;
pub mod error;
pub mod schema;
pub mod server;
pub mod template;

pub use api::*;
pub use descriptor::*;
pub use error::*;
pub use schema::{check, Schema, Validate, ValidationError, Violation};
pub use template::*;
