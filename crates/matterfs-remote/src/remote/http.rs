use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};

use matterfs_config::Secret;
use matterfs_core::{
    ChangeEvent, Matter, NewDocument, RemoteEntry, RemoteError, RemoteStore,
};

/// HTTP remote client configuration.
#[derive(Debug, Clone)]
pub struct HttpRemoteConfig {
    pub base_url: String,
    pub token: Option<Secret>,
    pub timeout: std::time::Duration,
}

/// Remote store backed by the firm's document REST API.
pub struct HttpRemoteClient {
    client: Client,
    base_url: String,
    token: Option<Secret>,
}

#[derive(Debug, Deserialize)]
struct MatterDto {
    id: String,
    client_name: String,
    number: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct EntryDto {
    #[serde(default)]
    document_id: Option<String>,
    name: String,
    path: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct CreateFileBody<'a> {
    name: &'a str,
    path: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameBody<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct MoveBody<'a> {
    path: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateFolderBody<'a> {
    name: &'a str,
    parent_path: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameFolderBody<'a> {
    old_path: &'a str,
    new_path: &'a str,
}

impl HttpRemoteClient {
    pub fn new(config: HttpRemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(HttpRemoteClient {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.token {
            Some(token) => req.bearer_auth(token.expose()),
            None => req,
        }
    }

    fn map_send_error(operation: &str, target: &str, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout {
                operation: operation.to_string(),
                target: target.to_string(),
            }
        } else if e.is_connect() {
            RemoteError::ConnectionFailed { source: Box::new(e) }
        } else {
            RemoteError::Other(e.to_string())
        }
    }

    async fn check_status(target: &str, response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound(target.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RemoteError::AccessDenied(target.to_string()))
            }
            _ => Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            }),
        }
    }

    async fn send(
        &self,
        operation: &str,
        target: &str,
        req: RequestBuilder,
    ) -> Result<Response, RemoteError> {
        let response = req
            .send()
            .await
            .map_err(|e| Self::map_send_error(operation, target, e))?;
        Self::check_status(target, response).await
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteClient {
    async fn list_matters(&self) -> Result<Vec<Matter>, RemoteError> {
        let url = self.url("matters");
        let response = self
            .send("list_matters", "matters", self.request(Method::GET, &url))
            .await?;
        let dtos: Vec<MatterDto> = response
            .json()
            .await
            .map_err(|e| RemoteError::Other(format!("malformed matter list: {}", e)))?;
        Ok(dtos
            .into_iter()
            .map(|m| Matter {
                id: m.id,
                client_name: m.client_name,
                number: m.number,
                name: m.name,
            })
            .collect())
    }

    async fn list_files(
        &self,
        matter_id: &str,
        path: Option<&str>,
    ) -> Result<Vec<RemoteEntry>, RemoteError> {
        let url = self.url(&format!("matters/{}/files", matter_id));
        let mut req = self.request(Method::GET, &url);
        if let Some(path) = path {
            req = req.query(&[("path", path)]);
        }
        let response = self.send("list_files", matter_id, req).await?;
        let dtos: Vec<EntryDto> = response
            .json()
            .await
            .map_err(|e| RemoteError::Other(format!("malformed file list: {}", e)))?;
        Ok(dtos
            .into_iter()
            .map(|e| RemoteEntry {
                document_id: e.document_id,
                name: e.name,
                path: e.path,
                is_dir: e.is_dir,
                size: e.size,
                modified: e.modified,
            })
            .collect())
    }

    async fn download_file(&self, document_id: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.url(&format!("documents/{}/content", document_id));
        let response = self
            .send("download_file", document_id, self.request(Method::GET, &url))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::map_send_error("download_file", document_id, e))?;
        Ok(bytes.to_vec())
    }

    async fn upload_file(&self, document_id: &str, bytes: &[u8]) -> Result<(), RemoteError> {
        let url = self.url(&format!("documents/{}/content", document_id));
        self.send(
            "upload_file",
            document_id,
            self.request(Method::PUT, &url).body(bytes.to_vec()),
        )
        .await?;
        Ok(())
    }

    async fn create_file(
        &self,
        matter_id: &str,
        name: &str,
        path: &str,
    ) -> Result<NewDocument, RemoteError> {
        let url = self.url(&format!("matters/{}/documents", matter_id));
        let response = self
            .send(
                "create_file",
                matter_id,
                self.request(Method::POST, &url)
                    .json(&CreateFileBody { name, path }),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Other(format!("malformed create response: {}", e)))
    }

    async fn delete_file(&self, document_id: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("documents/{}", document_id));
        self.send(
            "delete_file",
            document_id,
            self.request(Method::DELETE, &url),
        )
        .await?;
        Ok(())
    }

    async fn rename_file(&self, document_id: &str, new_name: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("documents/{}/rename", document_id));
        self.send(
            "rename_file",
            document_id,
            self.request(Method::POST, &url)
                .json(&RenameBody { name: new_name }),
        )
        .await?;
        Ok(())
    }

    async fn move_file(&self, document_id: &str, new_path: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("documents/{}/move", document_id));
        self.send(
            "move_file",
            document_id,
            self.request(Method::POST, &url)
                .json(&MoveBody { path: new_path }),
        )
        .await?;
        Ok(())
    }

    async fn create_folder(
        &self,
        matter_id: &str,
        name: &str,
        parent_path: &str,
    ) -> Result<(), RemoteError> {
        let url = self.url(&format!("matters/{}/folders", matter_id));
        self.send(
            "create_folder",
            matter_id,
            self.request(Method::POST, &url)
                .json(&CreateFolderBody { name, parent_path }),
        )
        .await?;
        Ok(())
    }

    async fn delete_folder(&self, matter_id: &str, path: &str) -> Result<(), RemoteError> {
        let url = self.url(&format!("matters/{}/folders", matter_id));
        self.send(
            "delete_folder",
            matter_id,
            self.request(Method::DELETE, &url).query(&[("path", path)]),
        )
        .await?;
        Ok(())
    }

    async fn rename_folder(
        &self,
        matter_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), RemoteError> {
        let url = self.url(&format!("matters/{}/folders/rename", matter_id));
        self.send(
            "rename_folder",
            matter_id,
            self.request(Method::POST, &url)
                .json(&RenameFolderBody { old_path, new_path }),
        )
        .await?;
        Ok(())
    }

    async fn get_changes(&self, since: DateTime<Utc>) -> Result<Vec<ChangeEvent>, RemoteError> {
        let url = self.url("changes");
        let response = self
            .send(
                "get_changes",
                "changes",
                self.request(Method::GET, &url)
                    .query(&[("since", since.to_rfc3339())]),
            )
            .await?;
        response
            .json()
            .await
            .map_err(|e| RemoteError::Other(format!("malformed change feed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = HttpRemoteClient::new(HttpRemoteConfig {
            base_url: "https://api.example.com/".to_string(),
            token: None,
            timeout: std::time::Duration::from_secs(5),
        })
        .unwrap();

        assert_eq!(
            client.url("matters/m-1/files"),
            "https://api.example.com/api/v1/matters/m-1/files"
        );
    }
}
