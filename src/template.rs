// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Rendering and matching endpoint paths.
//!
//! Parameter values are inserted raw. They are not percent-encoded, so a value containing `/`
//! produces a path with more segments than the endpoint declares.

use crate::descriptor::EndpointDescriptor;
use crate::error::ContractError;
use std::collections::HashMap;

/// Path parameter values by name.
pub type PathParams = HashMap<String, String>;

/// The route pattern for an endpoint, with each parameter written `:name`.
///
/// For `GET /pets/{type}/{name}` this is `/pets/:type/:name`.
pub fn generic_path(endpoint: &EndpointDescriptor) -> String {
    let segments = endpoint.segments();
    let mut path = segments[0].clone();
    for (name, segment) in endpoint.param_names().iter().zip(&segments[1..]) {
        path.push(':');
        path.push_str(name);
        path.push_str(segment);
    }
    path
}

/// The path of a request to `endpoint` with the given parameter values.
///
/// An endpoint without parameters ignores `values` entirely. Otherwise every declared parameter
/// must have a value.
pub fn concrete_path(
    endpoint: &EndpointDescriptor,
    values: Option<&PathParams>,
) -> Result<String, ContractError> {
    let segments = endpoint.segments();
    let mut path = segments[0].clone();
    for (name, segment) in endpoint.param_names().iter().zip(&segments[1..]) {
        let value = values
            .and_then(|values| values.get(name))
            .ok_or_else(|| ContractError::MissingParameter { name: name.clone() })?;
        path.push_str(value);
        path.push_str(segment);
    }
    Ok(path)
}

/// Match a request path against an endpoint, recovering its parameter values.
///
/// Each parameter matches a non-empty string without `/`, the same way `:name` matches in a
/// generic path.
pub fn match_path(endpoint: &EndpointDescriptor, path: &str) -> Option<PathParams> {
    let segments = endpoint.segments();
    let rest = path.strip_prefix(segments[0].as_str())?;
    let mut values = Vec::with_capacity(endpoint.param_names().len());
    if !match_from(&segments[1..], rest, &mut values) {
        return None;
    }
    Some(
        endpoint
            .param_names()
            .iter()
            .cloned()
            .zip(values.into_iter().map(str::to_string))
            .collect(),
    )
}

fn match_from<'a>(segments: &[String], rest: &'a str, values: &mut Vec<&'a str>) -> bool {
    let (next, remaining) = match segments.split_first() {
        Some(split) => split,
        None => return rest.is_empty(),
    };
    let limit = rest.find('/').unwrap_or_else(|| rest.len());
    for end in 1..=limit {
        if !rest.is_char_boundary(end) {
            continue;
        }
        if let Some(tail) = rest[end..].strip_prefix(next.as_str()) {
            values.push(&rest[..end]);
            if match_from(remaining, tail, values) {
                return true;
            }
            values.pop();
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{get, put};

    fn params(pairs: &[(&str, &str)]) -> PathParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn generic_path_uses_placeholders_in_order() {
        assert_eq!(generic_path(&put("/list/{id}/add")), "/list/:id/add");
        assert_eq!(
            generic_path(&put("/todos/{todoId}/moveTo/{listId}")),
            "/todos/:todoId/moveTo/:listId"
        );
    }

    #[test]
    fn concrete_path_substitutes_values() {
        let ep = get("/path/{kind}/id/{id}");
        let values = params(&[("kind", "special"), ("id", "3")]);
        assert_eq!(
            concrete_path(&ep, Some(&values)).unwrap(),
            "/path/special/id/3"
        );
    }

    #[test]
    fn zero_parameters_ignore_values() {
        let ep = get("/version");
        assert_eq!(generic_path(&ep), "/version");
        assert_eq!(concrete_path(&ep, None).unwrap(), "/version");
        assert_eq!(
            concrete_path(&ep, Some(&PathParams::new())).unwrap(),
            "/version"
        );
        assert_eq!(
            concrete_path(&ep, Some(&params(&[("id", "1")]))).unwrap(),
            "/version"
        );
    }

    #[test]
    fn missing_values_are_an_error() {
        let ep = get("/list/{id}");
        assert_eq!(
            concrete_path(&ep, None).unwrap_err(),
            ContractError::MissingParameter { name: "id".into() }
        );
        let ep = get("/path/{kind}/id/{id}");
        assert_eq!(
            concrete_path(&ep, Some(&params(&[("kind", "a")]))).unwrap_err(),
            ContractError::MissingParameter { name: "id".into() }
        );
    }

    #[test]
    fn matching_recovers_values() {
        let ep = get("/todos/{todoId}/moveTo/{listId}");
        let values = params(&[("todoId", "42"), ("listId", "groceries")]);
        let path = concrete_path(&ep, Some(&values)).unwrap();
        assert_eq!(match_path(&ep, &path), Some(values));
    }

    #[test]
    fn matching_handles_literal_suffixes() {
        let ep = get("/files/{name}.{ext}");
        assert_eq!(
            match_path(&ep, "/files/archive.tar.gz"),
            Some(params(&[("name", "archive"), ("ext", "tar.gz")]))
        );
    }

    #[test]
    fn matching_rejects_other_paths() {
        let ep = get("/list/{id}/add");
        assert_eq!(match_path(&ep, "/list/7/add"), Some(params(&[("id", "7")])));
        assert_eq!(match_path(&ep, "/list//add"), None);
        assert_eq!(match_path(&ep, "/list/7/add/more"), None);
        assert_eq!(match_path(&ep, "/lists/7/add"), None);
        assert_eq!(match_path(&get("/version"), "/version"), Some(PathParams::new()));
        assert_eq!(match_path(&get("/version"), "/version/"), None);
    }

    #[test]
    fn slashes_in_values_are_not_encoded() {
        // Values are inserted raw, so the resulting path no longer matches the route.
        let ep = get("/list/{id}");
        let path = concrete_path(&ep, Some(&params(&[("id", "a/b")]))).unwrap();
        assert_eq!(path, "/list/a/b");
        assert_eq!(match_path(&ep, &path), None);

        let path = concrete_path(&ep, Some(&params(&[("id", "a?b")]))).unwrap();
        assert_eq!(path, "/list/a?b");
    }
}
