//! HTTP client for the delta-sync endpoint.

use serde::Serialize;

use crate::block::{Block, DeltaBlock};
use crate::error::{FolioError, Result};

use super::remote::{
    BlockRemote, BoxFuture, DocumentContext, Snapshot, SnapshotReason, SnapshotService,
};

/// [`BlockRemote`] and [`SnapshotService`] over HTTP.
///
/// Routes are relative to `base_url`:
/// - `GET   documents/{id}/blocks`
/// - `PATCH documents/{id}/blocks/sync` with `{ "deltaBlocks": [...] }`
/// - `POST  documents/{id}/snapshots` with `{ "reason": "merge" }`
pub struct HttpBlockRemote {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncBody<'a> {
    delta_blocks: &'a [DeltaBlock],
}

#[derive(Serialize)]
struct SnapshotBody {
    reason: SnapshotReason,
}

impl HttpBlockRemote {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            auth_token,
        }
    }

    fn url(&self, document_id: &str, path: &str) -> String {
        format!("{}/documents/{}/{}", self.base_url, document_id, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<String> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| FolioError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FolioError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(FolioError::Server {
                status: status.as_u16(),
                message: body,
            });
        }
        Ok(body)
    }
}

impl BlockRemote for HttpBlockRemote {
    fn fetch_blocks<'a>(&'a self, ctx: &'a DocumentContext) -> BoxFuture<'a, Result<Vec<Block>>> {
        Box::pin(async move {
            let body = self.send(self.client.get(self.url(&ctx.id, "blocks"))).await?;
            Ok(serde_json::from_str(&body)?)
        })
    }

    fn sync_deltas<'a>(
        &'a self,
        ctx: &'a DocumentContext,
        deltas: &'a [DeltaBlock],
    ) -> BoxFuture<'a, Result<Option<Vec<Block>>>> {
        Box::pin(async move {
            let request = self
                .client
                .patch(self.url(&ctx.id, "blocks/sync"))
                .json(&SyncBody {
                    delta_blocks: deltas,
                });
            let body = self.send(request).await?;

            let body = body.trim();
            if body.is_empty() || body == "null" {
                return Ok(None);
            }
            Ok(Some(serde_json::from_str(body)?))
        })
    }
}

impl SnapshotService for HttpBlockRemote {
    fn create_snapshot<'a>(
        &'a self,
        document_id: &'a str,
        reason: SnapshotReason,
    ) -> BoxFuture<'a, Result<Snapshot>> {
        Box::pin(async move {
            let request = self
                .client
                .post(self.url(document_id, "snapshots"))
                .json(&SnapshotBody { reason });
            let body = self.send(request).await?;
            Ok(serde_json::from_str(&body)?)
        })
    }
}
