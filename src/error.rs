// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::schema::Violation;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snafu::Snafu;
use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};
use tide::StatusCode;

/// Errors which can be serialized in a response body.
///
/// This trait defines the standard error type returned by the endpoints of an API. When a request
/// fails, the body of the response contains a serialization of the error that caused the failure.
/// The `client` module can deserialize such a body back into the same type.
///
/// Other errors (those which don't downcast to the API's error type, such as errors generated by
/// the [tide] framework or by a handler) are converted with [Error::catch_all], keeping their
/// status code and their [Display] text.
pub trait Error: std::error::Error + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn catch_all(status: StatusCode, msg: String) -> Self;
    fn status(&self) -> StatusCode;

    /// Convert from a generic server or client-side error to a specific error type.
    ///
    /// If `source` can be downcast to `Self`, it is simply downcasted. Otherwise, it is converted
    /// to a [String] using [Display] and then converted to `Self` using [Error::catch_all].
    fn from_client_error(source: surf::Error) -> Self {
        let status = source.status();
        match source.downcast::<Self>() {
            Ok(err) => err,
            Err(err) => Self::catch_all(status, err.to_string()),
        }
    }
}

/// Convert a concrete error type into a server error.
///
/// The error is first converted into an `E` using the [From] instance, then embedded in a
/// [tide::Error] with the status code given by [Error::status].
pub fn server_error<E: Error>(error: impl Into<E>) -> tide::Error {
    let error = error.into();
    tide::Error::new(error.status(), error)
}

/// Convert a concrete error type into a client error.
///
/// This is the equivalent of [server_error] for errors generated on the client side, such as a
/// call which times out.
pub fn client_error<E: Error>(error: impl Into<E>) -> surf::Error {
    let error = error.into();
    surf::Error::new(error.status(), error)
}

/// Which part of an incoming request failed validation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Body,
    Query,
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body => write!(f, "body"),
            Self::Query => write!(f, "query"),
        }
    }
}

/// Errors raised while building or serving an API contract.
///
/// Construction errors (`MissingHandler`, `DuplicateHandler`, ...) are fatal at startup.
/// `Validation` is the only variant produced while serving traffic; it maps to 400.
#[derive(Clone, Debug, Snafu, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContractError {
    #[snafu(display("invalid request {}: {}", target, fmt_violations(violations)))]
    Validation {
        target: Target,
        violations: Vec<Violation>,
    },

    #[snafu(display("missing value for path parameter `{}`", name))]
    MissingParameter { name: String },

    #[snafu(display("no handler for operation `{}`", operation))]
    MissingHandler { operation: String },

    #[snafu(display("operation `{}` was assigned more than one handler", operation))]
    DuplicateHandler { operation: String },

    #[snafu(display("operation `{}` is defined more than once", operation))]
    DuplicateOperation { operation: String },

    #[snafu(display("unknown operation `{}`", operation))]
    UnknownOperation { operation: String },

    #[snafu(display(
        "path has {} segments but {} parameters were declared",
        segments,
        params
    ))]
    InvalidDescriptor { segments: usize, params: usize },

    #[snafu(display("invalid schema: {}", message))]
    InvalidSchema { message: String },

    #[snafu(display("{}", message))]
    CatchAll { status: u16, message: String },
}

impl Error for ContractError {
    fn catch_all(status: StatusCode, message: String) -> Self {
        Self::CatchAll {
            status: status.into(),
            message,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BadRequest,
            Self::CatchAll { status, .. } => {
                StatusCode::try_from(*status).unwrap_or(StatusCode::InternalServerError)
            }
            _ => StatusCode::InternalServerError,
        }
    }
}

fn fmt_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_bad_request() {
        let err = ContractError::Validation {
            target: Target::Query,
            violations: vec![Violation::new("/mandatory", "null is not of type \"string\"")],
        };
        assert_eq!(err.status(), StatusCode::BadRequest);
        assert_eq!(
            err.to_string(),
            "invalid request query: /mandatory: null is not of type \"string\""
        );
    }

    #[test]
    fn catch_all_keeps_status() {
        let err = ContractError::catch_all(StatusCode::ImATeapot, "short and stout".into());
        assert_eq!(err.status(), StatusCode::ImATeapot);
        assert_eq!(err.to_string(), "short and stout");
    }

    #[test]
    fn foreign_client_errors_become_catch_all() {
        let source = surf::Error::from_str(StatusCode::BadGateway, "upstream went away");
        let err = ContractError::from_client_error(source);
        assert_eq!(
            err,
            ContractError::CatchAll {
                status: 502,
                message: "upstream went away".into()
            }
        );
    }

    #[test]
    fn contract_errors_round_trip_through_surf() {
        let err = client_error::<ContractError>(ContractError::MissingParameter {
            name: "id".into(),
        });
        assert_eq!(err.status(), StatusCode::InternalServerError);
        assert_eq!(
            ContractError::from_client_error(err),
            ContractError::MissingParameter { name: "id".into() }
        );
    }
}
