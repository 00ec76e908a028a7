// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::error::ContractError;
use crate::schema::Schema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use tide::http;

/// The HTTP methods an endpoint can be declared with.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Put,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// The same method as understood by `tide` and `surf`.
    pub fn to_http(self) -> http::Method {
        match self {
            Self::Get => http::Method::Get,
            Self::Put => http::Method::Put,
            Self::Post => http::Method::Post,
            Self::Patch => http::Method::Patch,
            Self::Delete => http::Method::Delete,
        }
    }

    pub fn from_http(method: http::Method) -> Option<Self> {
        match method {
            http::Method::Get => Some(Self::Get),
            http::Method::Put => Some(Self::Put),
            http::Method::Post => Some(Self::Post),
            http::Method::Patch => Some(Self::Patch),
            http::Method::Delete => Some(Self::Delete),
            _ => None,
        }
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schemas of the query parameters accepted by an endpoint, by parameter name.
pub type QuerySchema = BTreeMap<String, Schema>;

/// Immutable description of a single API operation.
///
/// The path is stored as literal segments with the parameter names between them, so
/// `/list/{id}/add` is `["/list/", "/add"]` and `["id"]`. There is always exactly one more segment
/// than there are parameters.
///
/// Every builder method returns a new descriptor, leaving `self` untouched.
#[derive(Clone, Debug)]
pub struct EndpointDescriptor {
    method: Method,
    segments: Vec<String>,
    params: Vec<String>,
    query: Option<QuerySchema>,
    body: Option<Schema>,
    response: Option<Schema>,
}

impl EndpointDescriptor {
    /// Create a descriptor from a path template.
    ///
    /// Path parameters are written `{name}`, where `name` is a non-empty run of ASCII
    /// alphanumerics and underscores. Anything else, including unbalanced braces, is literal
    /// path text.
    pub fn new(method: Method, template: &str) -> Self {
        let (segments, params) = parse_template(template);
        Self {
            method,
            segments,
            params,
            query: None,
            body: None,
            response: None,
        }
    }

    /// Create a descriptor from literal segments and parameter names.
    pub fn from_parts(
        method: Method,
        segments: Vec<String>,
        params: Vec<String>,
    ) -> Result<Self, ContractError> {
        if segments.len() != params.len() + 1 {
            return Err(ContractError::InvalidDescriptor {
                segments: segments.len(),
                params: params.len(),
            });
        }
        Ok(Self {
            method,
            segments,
            params,
            query: None,
            body: None,
            response: None,
        })
    }

    pub fn method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }

    /// Replace the path, keeping everything else.
    pub fn path(&self, template: &str) -> Self {
        let (segments, params) = parse_template(template);
        Self {
            segments,
            params,
            ..self.clone()
        }
    }

    pub fn query<I, K>(&self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        Self {
            query: Some(params.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            ..self.clone()
        }
    }

    /// Add a single query parameter to the declared query schema.
    pub fn query_param(&self, name: impl Into<String>, schema: Schema) -> Self {
        let mut query = self.query.clone().unwrap_or_default();
        query.insert(name.into(), schema);
        Self {
            query: Some(query),
            ..self.clone()
        }
    }

    pub fn body(&self, schema: Schema) -> Self {
        Self {
            body: Some(schema),
            ..self.clone()
        }
    }

    pub fn response(&self, schema: Schema) -> Self {
        Self {
            response: Some(schema),
            ..self.clone()
        }
    }

    pub fn http_method(&self) -> Method {
        self.method
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn param_names(&self) -> &[String] {
        &self.params
    }

    pub fn query_schema(&self) -> Option<&QuerySchema> {
        self.query.as_ref()
    }

    pub fn body_schema(&self) -> Option<&Schema> {
        self.body.as_ref()
    }

    pub fn response_schema(&self) -> Option<&Schema> {
        self.response.as_ref()
    }
}

pub fn get(template: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(Method::Get, template)
}

pub fn put(template: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(Method::Put, template)
}

pub fn post(template: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(Method::Post, template)
}

pub fn patch(template: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(Method::Patch, template)
}

pub fn delete(template: &str) -> EndpointDescriptor {
    EndpointDescriptor::new(Method::Delete, template)
}

fn parse_template(template: &str) -> (Vec<String>, Vec<String>) {
    let mut segments = Vec::new();
    let mut params = Vec::new();
    let mut literal = String::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        literal.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_param_name(&after[..close]) => {
                segments.push(std::mem::take(&mut literal));
                params.push(after[..close].to_string());
                rest = &after[close + 1..];
            }
            _ => {
                literal.push('{');
                rest = after;
            }
        }
    }
    literal.push_str(rest);
    segments.push(literal);
    (segments, params)
}

fn is_param_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_parameters_in_order() {
        let ep = get("/todos/{todoId}/moveTo/{listId}");
        assert_eq!(ep.segments(), ["/todos/", "/moveTo/", ""]);
        assert_eq!(ep.param_names(), ["todoId", "listId"]);
        assert_eq!(ep.http_method(), Method::Get);
    }

    #[test]
    fn plain_path_has_one_segment() {
        let ep = delete("/method/delete");
        assert_eq!(ep.segments(), ["/method/delete"]);
        assert!(ep.param_names().is_empty());
    }

    #[test]
    fn malformed_braces_are_literal() {
        let ep = get("/a/{not a name}/{}/{ok}/{open");
        assert_eq!(ep.param_names(), ["ok"]);
        assert_eq!(ep.segments(), ["/a/{not a name}/{}/", "/{open"]);
    }

    #[test]
    fn from_parts_checks_lengths() {
        let err = EndpointDescriptor::from_parts(
            Method::Post,
            vec!["/a/".into()],
            vec!["id".into()],
        )
        .unwrap_err();
        assert_eq!(
            err,
            ContractError::InvalidDescriptor {
                segments: 1,
                params: 1
            }
        );
        assert!(EndpointDescriptor::from_parts(
            Method::Post,
            vec!["/a/".into(), "".into()],
            vec!["id".into()]
        )
        .is_ok());
    }

    #[test]
    fn builders_do_not_mutate() {
        let base = get("/lists");
        let with_query = base.query_param("searchQuery", Schema::example("groceries"));
        let posted = with_query.method(Method::Post).body(Schema::example(json!({})));
        assert!(base.query_schema().is_none());
        assert_eq!(with_query.http_method(), Method::Get);
        assert!(with_query.body_schema().is_none());
        assert_eq!(posted.http_method(), Method::Post);
        assert_eq!(posted.query_schema().map(|q| q.len()), Some(1));
        assert!(posted.body_schema().is_some());

        let moved = posted.path("/list/{id}");
        assert_eq!(moved.param_names(), ["id"]);
        assert_eq!(posted.param_names().len(), 0);
    }

    #[test]
    fn methods_map_to_http() {
        for method in [
            Method::Get,
            Method::Put,
            Method::Post,
            Method::Patch,
            Method::Delete,
        ]
        .iter()
        {
            assert_eq!(Method::from_http(method.to_http()), Some(*method));
            assert_eq!(method.to_http().to_string(), method.as_str());
        }
        assert_eq!(Method::from_http(http::Method::Options), None);
    }
}
