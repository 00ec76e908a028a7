// Copyright (c) 2022 Espresso Systems (espressosys.com)
// This file is part of the Net Contract library.

// This program is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License as published by the Free Software Foundation, either version 3 of the License, or (at your option) any later version.
// This program is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
// You should have received a copy of the GNU General Public License along with this program. If not, see <https://www.gnu.org/licenses/>.

use crate::descriptor::EndpointDescriptor;
use crate::error::ContractError;
use std::collections::BTreeMap;

/// A named collection of endpoints, shared between the producer and the consumers of an API.
///
/// Once built, an `ApiDescriptor` is never modified. Wrap it in an [Arc](std::sync::Arc) to hand
/// the same description to a [Router](crate::server::Router) and a
/// [Consumer](crate::client::Consumer).
#[derive(Clone, Debug, Default)]
pub struct ApiDescriptor {
    endpoints: BTreeMap<String, EndpointDescriptor>,
}

impl ApiDescriptor {
    pub fn builder() -> ApiBuilder {
        ApiBuilder::default()
    }

    pub fn get(&self, operation: &str) -> Option<&EndpointDescriptor> {
        self.endpoints.get(operation)
    }

    pub fn contains(&self, operation: &str) -> bool {
        self.endpoints.contains_key(operation)
    }

    /// Operations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EndpointDescriptor)> {
        self.endpoints.iter().map(|(name, ep)| (name.as_str(), ep))
    }

    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[derive(Default)]
pub struct ApiBuilder {
    endpoints: BTreeMap<String, EndpointDescriptor>,
    duplicate: Option<String>,
}

impl ApiBuilder {
    pub fn endpoint(mut self, operation: impl Into<String>, endpoint: EndpointDescriptor) -> Self {
        let operation = operation.into();
        if self.endpoints.contains_key(&operation) {
            self.duplicate.get_or_insert(operation);
        } else {
            self.endpoints.insert(operation, endpoint);
        }
        self
    }

    pub fn build(self) -> Result<ApiDescriptor, ContractError> {
        if let Some(operation) = self.duplicate {
            return Err(ContractError::DuplicateOperation { operation });
        }
        Ok(ApiDescriptor {
            endpoints: self.endpoints,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{get, post, Method};

    #[test]
    fn builds_named_operations() {
        let api = ApiDescriptor::builder()
            .endpoint("version", get("/version"))
            .endpoint("createList", post("/lists"))
            .build()
            .unwrap();
        assert_eq!(api.len(), 2);
        assert!(api.contains("version"));
        assert_eq!(
            api.get("createList").map(|ep| ep.http_method()),
            Some(Method::Post)
        );
        assert_eq!(
            api.operations().collect::<Vec<_>>(),
            vec!["createList", "version"]
        );
    }

    #[test]
    fn rejects_duplicate_operation_names() {
        let err = ApiDescriptor::builder()
            .endpoint("version", get("/version"))
            .endpoint("version", get("/v2/version"))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            ContractError::DuplicateOperation {
                operation: "version".into()
            }
        );
    }
}
