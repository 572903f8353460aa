//! REST implementation of the [`Gateway`] trait.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use std::sync::RwLock;

use crate::error::{HuddleError, Result};
use crate::types::{Membership, Session, Team, User};

use super::codec;
use super::{Document, DocumentQuery, Execution, Gateway, Subscription, realtime};

/// Client for the collaboration backend's REST and realtime APIs. Holds the
/// session secret for the signed-in user; all other state lives server-side.
pub struct HttpGateway {
    http: reqwest::Client,
    endpoint: String,
    project_id: String,
    database_id: String,
    session_secret: RwLock<Option<String>>,
}

impl HttpGateway {
    pub fn new(endpoint: &str, project_id: &str, database_id: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| HuddleError::Configuration(format!("http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project_id: project_id.to_string(),
            database_id: database_id.to_string(),
            session_secret: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn documents_path(&self, collection_id: &str) -> String {
        format!(
            "/databases/{}/collections/{}/documents",
            self.database_id, collection_id
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, self.url(path))
            .header("X-Appwrite-Project", &self.project_id)
            .header("X-Appwrite-Response-Format", "1.6.0");
        let secret = self
            .session_secret
            .read()
            .ok()
            .and_then(|guard| guard.clone());
        if let Some(secret) = secret {
            builder = builder.header("X-Appwrite-Session", secret);
        }
        builder
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }
            let body = response.text().await?;
            if body.is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&body)?);
        }
        let message = response
            .text()
            .await
            .ok()
            .and_then(|body| {
                serde_json::from_str::<Value>(&body)
                    .ok()
                    .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
                    .or(Some(body))
            })
            .unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED => HuddleError::NotAuthenticated,
            StatusCode::FORBIDDEN => HuddleError::PermissionDenied(message),
            StatusCode::NOT_FOUND => HuddleError::NotFound(message),
            StatusCode::CONFLICT => HuddleError::Conflict(message),
            _ => HuddleError::Gateway {
                status: status.as_u16(),
                message,
            },
        })
    }

    fn user_from_value(value: &Value) -> Result<User> {
        Ok(User {
            id: value
                .get("$id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HuddleError::Gateway {
                    status: 0,
                    message: "user missing $id".to_string(),
                })?
                .to_string(),
            name: value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            email: value
                .get("email")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            prefs: value
                .get("prefs")
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default(),
        })
    }

    fn team_from_value(value: &Value) -> Result<Team> {
        Ok(Team {
            id: value
                .get("$id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| HuddleError::Gateway {
                    status: 0,
                    message: "team missing $id".to_string(),
                })?
                .to_string(),
            name: value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            total_members: value.get("total").and_then(|v| v.as_u64()).unwrap_or(0),
        })
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<User> {
        let mut body = json!({
            "userId": uuid::Uuid::new_v4().to_string(),
            "email": email,
            "password": password,
        });
        if let Some(name) = name {
            body["name"] = json!(name);
        }
        let value = self
            .send(self.request(Method::POST, "/account").json(&body))
            .await?;
        Self::user_from_value(&value)
    }

    async fn create_session(&self, email: &str, password: &str) -> Result<Session> {
        let body = json!({ "email": email, "password": password });
        let value = self
            .send(
                self.request(Method::POST, "/account/sessions/email")
                    .json(&body),
            )
            .await?;
        let session_id = value
            .get("$id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        // The session secret is only returned at creation time.
        let secret = value
            .get("secret")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(&session_id)
            .to_string();
        if let Ok(mut guard) = self.session_secret.write() {
            *guard = Some(secret);
        }
        Ok(Session {
            id: session_id,
            user_id: value
                .get("userId")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        })
    }

    async fn delete_session(&self) -> Result<()> {
        self.send(self.request(Method::DELETE, "/account/sessions/current"))
            .await?;
        if let Ok(mut guard) = self.session_secret.write() {
            *guard = None;
        }
        Ok(())
    }

    async fn current_user(&self) -> Result<User> {
        let value = self.send(self.request(Method::GET, "/account")).await?;
        Self::user_from_value(&value)
    }

    async fn update_user_prefs(&self, prefs: serde_json::Map<String, Value>) -> Result<User> {
        let value = self
            .send(
                self.request(Method::PATCH, "/account/prefs")
                    .json(&json!({ "prefs": prefs })),
            )
            .await?;
        Self::user_from_value(&value)
    }

    async fn create_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Value,
        permissions: &[String],
    ) -> Result<Document> {
        let body = json!({
            "documentId": document_id,
            "data": data,
            "permissions": permissions,
        });
        let value = self
            .send(
                self.request(Method::POST, &self.documents_path(collection_id))
                    .json(&body),
            )
            .await?;
        codec::document_from_value(value)
    }

    async fn get_document(&self, collection_id: &str, document_id: &str) -> Result<Document> {
        let path = format!("{}/{document_id}", self.documents_path(collection_id));
        let value = self.send(self.request(Method::GET, &path)).await?;
        codec::document_from_value(value)
    }

    async fn update_document(
        &self,
        collection_id: &str,
        document_id: &str,
        data: Value,
    ) -> Result<Document> {
        let path = format!("{}/{document_id}", self.documents_path(collection_id));
        let value = self
            .send(
                self.request(Method::PATCH, &path)
                    .json(&json!({ "data": data })),
            )
            .await?;
        codec::document_from_value(value)
    }

    async fn delete_document(&self, collection_id: &str, document_id: &str) -> Result<()> {
        let path = format!("{}/{document_id}", self.documents_path(collection_id));
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }

    async fn list_documents(
        &self,
        collection_id: &str,
        query: DocumentQuery,
    ) -> Result<Vec<Document>> {
        let params: Vec<(String, String)> = query
            .render()
            .into_iter()
            .map(|q| ("queries[]".to_string(), q))
            .collect();
        let value = self
            .send(
                self.request(Method::GET, &self.documents_path(collection_id))
                    .query(&params),
            )
            .await?;
        value
            .get("documents")
            .and_then(|v| v.as_array())
            .map(|docs| {
                docs.iter()
                    .cloned()
                    .map(codec::document_from_value)
                    .collect()
            })
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn list_teams(&self) -> Result<Vec<Team>> {
        let value = self.send(self.request(Method::GET, "/teams")).await?;
        value
            .get("teams")
            .and_then(|v| v.as_array())
            .map(|teams| teams.iter().map(Self::team_from_value).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn create_team(&self, team_id: &str, name: &str) -> Result<Team> {
        let value = self
            .send(
                self.request(Method::POST, "/teams")
                    .json(&json!({ "teamId": team_id, "name": name })),
            )
            .await?;
        Self::team_from_value(&value)
    }

    async fn update_team_name(&self, team_id: &str, name: &str) -> Result<Team> {
        let value = self
            .send(
                self.request(Method::PUT, &format!("/teams/{team_id}"))
                    .json(&json!({ "name": name })),
            )
            .await?;
        Self::team_from_value(&value)
    }

    async fn delete_team(&self, team_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/teams/{team_id}")))
            .await?;
        Ok(())
    }

    async fn list_memberships(&self, team_id: &str) -> Result<Vec<Membership>> {
        let value = self
            .send(self.request(Method::GET, &format!("/teams/{team_id}/memberships")))
            .await?;
        let memberships = value
            .get("memberships")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(memberships
            .iter()
            .map(|m| Membership {
                user_id: m
                    .get("userId")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                user_name: m
                    .get("userName")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                user_email: m
                    .get("userEmail")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                roles: m
                    .get("roles")
                    .and_then(|v| v.as_array())
                    .map(|roles| {
                        roles
                            .iter()
                            .filter_map(|r| r.as_str())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                confirmed: m.get("confirm").and_then(|v| v.as_bool()).unwrap_or(false),
            })
            .collect())
    }

    async fn get_team_prefs(&self, team_id: &str) -> Result<serde_json::Map<String, Value>> {
        let value = self
            .send(self.request(Method::GET, &format!("/teams/{team_id}/prefs")))
            .await?;
        Ok(value.as_object().cloned().unwrap_or_default())
    }

    async fn update_team_prefs(
        &self,
        team_id: &str,
        prefs: serde_json::Map<String, Value>,
    ) -> Result<()> {
        self.send(
            self.request(Method::PUT, &format!("/teams/{team_id}/prefs"))
                .json(&json!({ "prefs": prefs })),
        )
        .await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        bucket_id: &str,
        file_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        permissions: &[String],
    ) -> Result<String> {
        let mut form = reqwest::multipart::Form::new()
            .text("fileId", file_id.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
            );
        for permission in permissions {
            form = form.text("permissions[]", permission.clone());
        }
        let value = self
            .send(
                self.request(Method::POST, &format!("/storage/buckets/{bucket_id}/files"))
                    .multipart(form),
            )
            .await?;
        value
            .get("$id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| HuddleError::Gateway {
                status: 0,
                message: "upload response missing $id".to_string(),
            })
    }

    async fn delete_file(&self, bucket_id: &str, file_id: &str) -> Result<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("/storage/buckets/{bucket_id}/files/{file_id}"),
        ))
        .await?;
        Ok(())
    }

    fn file_view_url(&self, bucket_id: &str, file_id: &str) -> String {
        format!(
            "{}/storage/buckets/{bucket_id}/files/{file_id}/view?project={}",
            self.endpoint, self.project_id
        )
    }

    async fn execute_function(&self, function_id: &str, body: Value) -> Result<Execution> {
        let value = self
            .send(
                self.request(Method::POST, &format!("/functions/{function_id}/executions"))
                    .json(&json!({ "body": body.to_string(), "async": false })),
            )
            .await?;
        let status_code = value
            .get("responseStatusCode")
            .or_else(|| value.get("statusCode"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u16;
        let response_body = value
            .get("responseBody")
            .or_else(|| value.get("response"))
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(Execution {
            status_code,
            response_body,
        })
    }

    async fn subscribe(&self, channels: &[String]) -> Result<Subscription> {
        realtime::open(&self.endpoint, &self.project_id, channels).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn gateway(endpoint: &str) -> HttpGateway {
        HttpGateway::new(endpoint, "proj", "main").unwrap()
    }

    #[test]
    fn test_view_url_is_deterministic() {
        let gw = gateway("https://backend.example.com/v1");
        assert_eq!(
            gw.file_view_url("media", "f1"),
            "https://backend.example.com/v1/storage/buckets/media/files/f1/view?project=proj"
        );
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let gw = gateway("https://backend.example.com/v1/");
        assert_eq!(gw.url("/account"), "https://backend.example.com/v1/account");
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/account")
            .with_status(401)
            .with_body(json!({"message": "missing scope"}).to_string())
            .create_async()
            .await;
        let gw = gateway(&server.url());
        let err = gw.current_user().await.unwrap_err();
        assert!(matches!(err, HuddleError::NotAuthenticated));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_conflict_carries_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/account")
            .with_status(409)
            .with_body(json!({"message": "user already exists"}).to_string())
            .create_async()
            .await;
        let gw = gateway(&server.url());
        let err = gw
            .create_account("a@example.com", "password123", None)
            .await
            .unwrap_err();
        match err {
            HuddleError::Conflict(message) => assert_eq!(message, "user already exists"),
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_list_documents_renders_queries() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/databases/main/collections/activities/documents")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded(
                    "queries[]".to_string(),
                    "equal(\"teamId\", [\"t1\"])".to_string(),
                ),
                mockito::Matcher::UrlEncoded(
                    "queries[]".to_string(),
                    "limit(50)".to_string(),
                ),
            ]))
            .with_status(200)
            .with_body(
                json!({"total": 1, "documents": [{"$id": "a1", "$createdAt": "2026-08-01T10:00:00Z", "teamId": "t1"}]})
                    .to_string(),
            )
            .create_async()
            .await;
        let gw = gateway(&server.url());
        let docs = gw
            .list_documents(
                "activities",
                DocumentQuery::new().equal("teamId", "t1").limit(50),
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "a1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_create_session_stores_secret() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/account/sessions/email")
            .with_status(201)
            .with_body(
                json!({"$id": "s1", "userId": "u1", "secret": "topsecret"}).to_string(),
            )
            .create_async()
            .await;
        let account = server
            .mock("GET", "/account")
            .match_header("X-Appwrite-Session", "topsecret")
            .with_status(200)
            .with_body(json!({"$id": "u1", "name": "Ada", "email": "a@example.com"}).to_string())
            .create_async()
            .await;
        let gw = gateway(&server.url());
        let session = gw.create_session("a@example.com", "password123").await.unwrap();
        assert_eq!(session.user_id, "u1");
        let user = gw.current_user().await.unwrap();
        assert_eq!(user.name, "Ada");
        account.assert_async().await;
    }
}
