//! Remote module store reached over a small HTTP blob protocol.
//!
//! Routes, relative to the configured endpoint:
//!
//! | Method         | Route                          | Meaning                      |
//! |----------------|--------------------------------|------------------------------|
//! | `GET`          | `containers`                   | JSON array of container names|
//! | `PUT`/`DELETE` | `containers/{c}`               | create / delete a container  |
//! | `GET`          | `containers/{c}/files`         | JSON array of file paths     |
//! | `GET`/`PUT`    | `containers/{c}/files/{path}`  | read / write a file          |
//! | `GET`/`PUT`    | `store/{name}`                 | read / write a store file    |
//!
//! An optional bearer token is sent with every request.

use reqwest::StatusCode;
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

use super::{ModuleStore, StoreError, normalize_file_path, validate_container_name};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Module store backed by a remote blob service.
#[derive(Debug, Clone)]
pub struct HttpModuleStore {
    client: Client,
    endpoint: Url,
    token: Option<String>,
}

impl HttpModuleStore {
    /// Create a client for the store at `endpoint`.
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StoreError::Configuration(format!("invalid endpoint '{endpoint}': {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::Configuration(format!(
                "endpoint '{endpoint}' cannot be used as a base URL"
            )));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| StoreError::Request {
                url: endpoint.to_string(),
                source,
            })?;
        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    /// Build a URL by appending percent-encoded segments to the endpoint.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        url
    }

    fn file_url(&self, container: &str, path: &str) -> Result<Url, StoreError> {
        validate_container_name(container)?;
        let path = normalize_file_path(path)?;
        let mut segments = vec!["containers", container, "files"];
        segments.extend(path.split('/'));
        Ok(self.url(&segments))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(&self, request: RequestBuilder, url: &Url) -> Result<Response, StoreError> {
        debug!(url = %url, "Module store request");
        self.authorize(request)
            .send()
            .map_err(|source| StoreError::Request {
                url: url.to_string(),
                source,
            })
    }

    fn check(response: Response, url: &Url) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(StoreError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    fn read_body(response: Response, url: &Url) -> Result<Vec<u8>, StoreError> {
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|source| StoreError::Request {
                url: url.to_string(),
                source,
            })
    }

    fn read_name_list(response: Response, url: &Url) -> Result<Vec<String>, StoreError> {
        let body = Self::read_body(response, url)?;
        let mut names: Vec<String> = serde_json::from_slice(&body).map_err(|e| StoreError::Status {
            url: url.to_string(),
            status: StatusCode::OK.as_u16(),
            body: format!("malformed listing: {e}"),
        })?;
        names.sort();
        Ok(names)
    }
}

impl ModuleStore for HttpModuleStore {
    fn is_local(&self) -> bool {
        false
    }

    fn list_containers(&self) -> Result<Vec<String>, StoreError> {
        let url = self.url(&["containers"]);
        let response = self.send(self.client.get(url.clone()), &url)?;
        let response = Self::check(response, &url)?;
        Self::read_name_list(response, &url)
    }

    fn create_container(&self, container: &str) -> Result<(), StoreError> {
        validate_container_name(container)?;
        let url = self.url(&["containers", container]);
        let response = self.send(self.client.put(url.clone()), &url)?;
        if response.status() == StatusCode::CONFLICT {
            return Err(StoreError::ContainerExists(container.to_string()));
        }
        Self::check(response, &url)?;
        Ok(())
    }

    fn delete_container(&self, container: &str) -> Result<(), StoreError> {
        validate_container_name(container)?;
        let url = self.url(&["containers", container]);
        let response = self.send(self.client.delete(url.clone()), &url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        Self::check(response, &url)?;
        Ok(())
    }

    fn put_file(&self, container: &str, path: &str, content: &[u8]) -> Result<(), StoreError> {
        let url = self.file_url(container, path)?;
        let request = self.client.put(url.clone()).body(content.to_vec());
        let response = self.send(request, &url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        Self::check(response, &url)?;
        Ok(())
    }

    fn get_file(&self, container: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let url = self.file_url(container, path)?;
        let response = self.send(self.client.get(url.clone()), &url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::FileNotFound {
                container: container.to_string(),
                path: path.to_string(),
            });
        }
        let response = Self::check(response, &url)?;
        Self::read_body(response, &url)
    }

    fn list_files(&self, container: &str) -> Result<Vec<String>, StoreError> {
        validate_container_name(container)?;
        let url = self.url(&["containers", container, "files"]);
        let response = self.send(self.client.get(url.clone()), &url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::ContainerNotFound(container.to_string()));
        }
        let response = Self::check(response, &url)?;
        Self::read_name_list(response, &url)
    }

    fn read_store_file(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let url = self.url(&["store", name]);
        let response = self.send(self.client.get(url.clone()), &url)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, &url)?;
        Self::read_body(response, &url).map(Some)
    }

    fn write_store_file(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        let url = self.url(&["store", name]);
        let request = self.client.put(url.clone()).body(content.to_vec());
        let response = self.send(request, &url)?;
        Self::check(response, &url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_building() -> Result<(), Box<dyn std::error::Error>> {
        let store = HttpModuleStore::new("https://store.example.com/api/", None)?;
        assert_eq!(
            store.url(&["containers"]).as_str(),
            "https://store.example.com/api/containers"
        );
        assert_eq!(
            store.url(&["containers", "my app"]).as_str(),
            "https://store.example.com/api/containers/my%20app"
        );
        Ok(())
    }

    #[test]
    fn test_file_url_encodes_each_segment() -> Result<(), Box<dyn std::error::Error>> {
        let store = HttpModuleStore::new("https://store.example.com", None)?;
        let url = store.file_url("app", "views/main page.js")?;
        assert_eq!(
            url.as_str(),
            "https://store.example.com/containers/app/files/views/main%20page.js"
        );
        assert!(store.file_url("app", "../secret").is_err());
        assert!(store.file_url("a/b", "x.js").is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpModuleStore::new("not a url", None),
            Err(StoreError::Configuration(_))
        ));
        assert!(matches!(
            HttpModuleStore::new("mailto:someone@example.com", None),
            Err(StoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_is_remote() -> Result<(), Box<dyn std::error::Error>> {
        let store = HttpModuleStore::new("http://localhost:9000", Some("secret".to_string()))?;
        assert!(!store.is_local());
        Ok(())
    }
}
