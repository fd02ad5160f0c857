use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use parley_types::api::{
    CreateGroupRequest, DeletedGroup, DeletedMessages, EditMessageRequest, Envelope, MemberQuery,
    RenameGroupRequest, SendMessageRequest,
};
use parley_types::{ErrorKind, Group, Membership, Message, Visibility};

use crate::error::{ClientError, ClientResult};

/// Header the server sets on failure envelopes.
const ERROR_KIND_HEADER: &str = "x-parley-error-kind";

/// Typed wrapper over the REST surface. Every call carries the bearer token.
#[derive(Clone)]
pub struct RestClient {
    http: Client,
    base_url: String,
    token: String,
}

impl RestClient {
    /// `base_url` is the server's `http://` or `https://` root.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> ClientResult<T> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status().as_u16();
        let kind = resp
            .headers()
            .get(ERROR_KIND_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(ErrorKind::from_name);

        let envelope: Envelope<T> = resp.json().await?;
        if !envelope.success {
            debug!("Request failed with {}: {}", status, envelope.message);
            return Err(ClientError::Api {
                status,
                kind: kind.unwrap_or(ErrorKind::RecordNotFound),
                message: envelope.message,
            });
        }
        envelope
            .data
            .ok_or_else(|| ClientError::Protocol("success envelope without data".to_string()))
    }

    // -- Groups --

    pub async fn list_public_groups(&self) -> ClientResult<Vec<Group>> {
        self.call(self.http.get(self.url("/groups/public"))).await
    }

    pub async fn list_private_groups(&self, user_id: Uuid) -> ClientResult<Vec<Group>> {
        self.call(
            self.http
                .get(self.url("/groups/private"))
                .query(&[("userId", user_id)]),
        )
        .await
    }

    pub async fn get_group(&self, group_id: Uuid) -> ClientResult<Group> {
        self.call(
            self.http
                .get(self.url("/groups/byid"))
                .query(&[("groupId", group_id)]),
        )
        .await
    }

    pub async fn create_group(&self, name: &str, visibility: Visibility) -> ClientResult<Group> {
        let body = CreateGroupRequest {
            name: name.to_string(),
            visibility,
        };
        self.call(self.http.post(self.url("/groups")).json(&body)).await
    }

    pub async fn rename_group(&self, group_id: Uuid, name: &str) -> ClientResult<Group> {
        let body = RenameGroupRequest {
            group_id,
            name: name.to_string(),
        };
        self.call(self.http.put(self.url("/groups")).json(&body)).await
    }

    pub async fn delete_group(&self, group_id: Uuid) -> ClientResult<DeletedGroup> {
        self.call(
            self.http
                .delete(self.url("/groups"))
                .query(&[("groupId", group_id)]),
        )
        .await
    }

    pub async fn list_members(&self, group_id: Uuid) -> ClientResult<Vec<Membership>> {
        self.call(
            self.http
                .get(self.url("/groups/members"))
                .query(&[("groupId", group_id)]),
        )
        .await
    }

    pub async fn add_member(&self, group_id: Uuid, user_id: Uuid) -> ClientResult<Membership> {
        self.call(
            self.http
                .post(self.url("/groups/members"))
                .query(&MemberQuery { group_id, user_id }),
        )
        .await
    }

    pub async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> ClientResult<MemberQuery> {
        self.call(
            self.http
                .delete(self.url("/groups/members"))
                .query(&MemberQuery { group_id, user_id }),
        )
        .await
    }

    // -- Messages --

    /// One page of history, newest first.
    pub async fn list_messages(
        &self,
        group_id: Uuid,
        skip: u32,
        page_size: Option<u32>,
    ) -> ClientResult<Vec<Message>> {
        let mut req = self
            .http
            .get(self.url("/messages"))
            .query(&[("groupId", group_id.to_string()), ("skip", skip.to_string())]);
        if let Some(size) = page_size {
            req = req.query(&[("pageSize", size)]);
        }
        self.call(req).await
    }

    pub async fn get_message(&self, message_id: Uuid) -> ClientResult<Message> {
        self.call(
            self.http
                .get(self.url("/messages/byid"))
                .query(&[("messageId", message_id)]),
        )
        .await
    }

    pub async fn add_message(&self, body: &SendMessageRequest) -> ClientResult<Message> {
        self.call(self.http.post(self.url("/messages")).json(body)).await
    }

    pub async fn edit_message(&self, body: &EditMessageRequest) -> ClientResult<Message> {
        self.call(self.http.put(self.url("/messages")).json(body)).await
    }

    pub async fn delete_message(&self, message_id: Uuid) -> ClientResult<DeletedMessages> {
        self.call(
            self.http
                .delete(self.url("/messages"))
                .query(&[("messageId", message_id)]),
        )
        .await
    }
}
