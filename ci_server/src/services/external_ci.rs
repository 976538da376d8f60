//! External CI: webhook endpoints, access keys and artifact ingestion.
//!
//! An access key is `base64(pipeline id) + "." + hex(hmac_sha256(secret,
//! "<id>-<name>-<timestamp>"))`. Only the hex token is stored; the prefix
//! lets the webhook find the endpoint without a token index.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::task::JoinSet;

use super::context::{finish, CiContext};
use crate::clients::CiSuccess;
use crate::config::{EXTERNAL_CI_WEBHOOK_PATH, SYSTEM_USER_ID};
use crate::error::{ConflictKind, EngineError, EngineResult};
use crate::events::{NotificationEvent, NotificationKind};
use crate::models::artifact::DATA_SOURCE_WEBHOOK;
use crate::models::run::{is_cancelled, STATUS_SUCCEEDED};
use crate::models::{
    Artifact, ArtifactUploaded, Attribute, CiPipeline, ConfigValue, ExternalCiEndpoint,
};
use crate::store::UnitOfWork;

type HmacSha256 = Hmac<Sha256>;

/// Hex MAC over `<id>-<name>-<timestamp>`.
pub fn access_token(secret: &str, pipeline_id: i64, name: &str, at: DateTime<Utc>) -> String {
    let message = format!("{pipeline_id}-{name}-{}", at.timestamp());
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

pub fn access_key(pipeline_id: i64, token: &str) -> String {
    format!("{}.{token}", STANDARD.encode(pipeline_id.to_string()))
}

/// Splits an access key into the pipeline id and the token.
pub fn parse_access_key(key: &str) -> Option<(i64, &str)> {
    let (prefix, token) = key.split_once('.')?;
    let decoded = STANDARD.decode(prefix).ok()?;
    let pipeline_id = std::str::from_utf8(&decoded).ok()?.parse().ok()?;
    Some((pipeline_id, token))
}

/// Compares without exiting early on the first differing byte.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let diff = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    (a.len() == b.len()) & (diff == 0)
}

/// A freshly issued endpoint and the one-time plain access key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedEndpoint {
    pub external_ci_id: i64,
    pub access_key: String,
    pub webhook_url: String,
}

/// Creates the webhook endpoint owned by an external pipeline.
pub async fn issue_endpoint(
    ctx: &CiContext,
    uow: &mut dyn UnitOfWork,
    pipeline: &CiPipeline,
) -> EngineResult<(ExternalCiEndpoint, IssuedEndpoint)> {
    let token = access_token(
        &ctx.config.external_ci_api_secret,
        pipeline.id,
        &pipeline.name,
        Utc::now(),
    );
    let endpoint = uow
        .insert_external_ci(ExternalCiEndpoint {
            id: 0,
            app_id: pipeline.app_id,
            ci_pipeline_id: pipeline.id,
            access_token: token.clone(),
            active: true,
        })
        .await?;

    let stem = webhook_url(ctx, uow).await?;
    let issued = IssuedEndpoint {
        external_ci_id: endpoint.id,
        access_key: access_key(pipeline.id, &token),
        webhook_url: format!("{stem}/{}", endpoint.id),
    };
    tracing::info!(
        ci_pipeline_id = pipeline.id,
        external_ci_id = endpoint.id,
        "external ci endpoint issued"
    );
    Ok((endpoint, issued))
}

/// Resolves the endpoint and owning pipeline an access key grants.
pub async fn authenticate(
    uow: &mut dyn UnitOfWork,
    external_ci_id: i64,
    key: &str,
) -> EngineResult<(ExternalCiEndpoint, CiPipeline)> {
    let (pipeline_id, token) = parse_access_key(key).ok_or(EngineError::AuthFailed)?;
    let endpoint = uow
        .find_external_ci_by_pipeline(pipeline_id)
        .await?
        .filter(|e| e.id == external_ci_id)
        .ok_or(EngineError::AuthFailed)?;

    if !constant_time_eq(endpoint.access_token.as_bytes(), token.as_bytes()) {
        tracing::warn!(external_ci_id, "external ci token mismatch");
        return Err(EngineError::AuthFailed);
    }

    let pipeline = uow
        .find_ci_pipeline(pipeline_id)
        .await?
        .filter(CiPipeline::is_live)
        .ok_or_else(|| EngineError::not_found("ci pipeline", pipeline_id))?;
    Ok((endpoint, pipeline))
}

/// Artifact announcement posted by an external CI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactWebhook {
    #[serde(default, alias = "dockerImage")]
    pub image: String,
    #[serde(default)]
    pub image_digest: String,
    #[serde(default, alias = "ciProjectDetails")]
    pub material_info: serde_json::Value,
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub workflow_run_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub is_artifact_uploaded: bool,
}

/// Persists the announced artifact for the endpoint's pipeline and every
/// live linked child, then hands each to the deployment dispatcher.
/// Returns the parent artifact id.
pub async fn ingest(
    ctx: &CiContext,
    external_ci_id: i64,
    key: &str,
    payload: ArtifactWebhook,
) -> EngineResult<i64> {
    if payload.image.is_empty() {
        return Err(EngineError::invalid("image is required"));
    }
    let user_id = payload.user_id.filter(|id| *id > 0).unwrap_or(SYSTEM_USER_ID);

    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let (endpoint, pipeline) = authenticate(uow.as_mut(), external_ci_id, key).await?;
        let stored =
            store_artifacts(uow.as_mut(), &endpoint, &pipeline, &payload, user_id).await?;
        Ok((pipeline, stored))
    }
    .await;
    let (pipeline, (parent_id, artifacts)) = finish(uow, result).await?;

    crate::metrics::artifacts_ingested(artifacts.len());
    tracing::info!(
        external_ci_id,
        ci_pipeline_id = pipeline.id,
        artifact_id = parent_id,
        children = artifacts.len() - 1,
        "external ci artifact ingested"
    );

    let event = NotificationEvent::ci(
        NotificationKind::Success,
        pipeline.id,
        pipeline.app_id,
        user_id,
    )
    .with_artifact(parent_id)
    .with_materials(payload.material_info.clone());
    if let Err(e) = ctx.bus.write_notification_event(&event).await {
        tracing::error!(error = %e, ci_pipeline_id = pipeline.id, "success notification failed");
    }

    dispatch(ctx, &artifacts, user_id).await;
    Ok(parent_id)
}

/// Writes the parent artifact, its linked-child copies and the run update.
/// Returns the parent id and every stored artifact, parent first.
async fn store_artifacts(
    uow: &mut dyn UnitOfWork,
    endpoint: &ExternalCiEndpoint,
    pipeline: &CiPipeline,
    payload: &ArtifactWebhook,
    user_id: i64,
) -> EngineResult<(i64, Vec<Artifact>)> {
    let mut run = match payload.workflow_run_id {
        Some(run_id) => {
            let run = uow
                .find_run_for_update(run_id)
                .await?
                .ok_or_else(|| EngineError::not_found("workflow run", run_id))?;
            if is_cancelled(&run.status) {
                return Err(EngineError::Conflict(ConflictKind::RunCancelled(run_id)));
            }
            Some(run)
        }
        None => None,
    };

    let material_info = ConfigValue::from_json(payload.material_info.clone()).compact();
    let parent = Artifact {
        id: 0,
        image: payload.image.clone(),
        image_digest: payload.image_digest.clone(),
        material_info,
        data_source: payload
            .data_source
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DATA_SOURCE_WEBHOOK.to_string()),
        pipeline_id: pipeline.id,
        workflow_run_id: payload.workflow_run_id,
        parent_artifact_id: None,
        external_ci_id: Some(endpoint.id),
        scan_enabled: pipeline.scan_enabled,
        scanned: false,
        is_artifact_uploaded: payload.is_artifact_uploaded,
        created_by: user_id,
        created_on: Utc::now(),
    };
    let mut stored = uow.insert_artifacts(vec![parent]).await?;
    let parent = stored
        .first()
        .cloned()
        .ok_or_else(|| EngineError::Internal("artifact insert returned no row".into()))?;

    let children: Vec<Artifact> = uow
        .find_by_parent_ci_id(pipeline.id)
        .await?
        .iter()
        .map(|child| parent.for_child(child.id, child.scan_enabled))
        .collect();
    stored.extend(uow.insert_artifacts(children).await?);

    if let Some(run) = run.as_mut() {
        run.status = STATUS_SUCCEEDED.to_string();
        run.artifact_id = Some(parent.id);
        run.is_artifact_uploaded = ArtifactUploaded::from(payload.is_artifact_uploaded);
        run.finished_on.get_or_insert_with(Utc::now);
        uow.update_run(run).await?;
        crate::metrics::workflow_status_updated(STATUS_SUCCEEDED);
    }
    Ok((parent.id, stored))
}

/// Hands artifacts to the dispatcher, `ci_auto_trigger_batch_size` at a time.
async fn dispatch(ctx: &CiContext, artifacts: &[Artifact], user_id: i64) {
    let batch = ctx.config.ci_auto_trigger_batch_size.max(1);
    for chunk in artifacts.chunks(batch) {
        let mut tasks = JoinSet::new();
        for artifact in chunk {
            let dispatcher = ctx.dispatcher.clone();
            let request = CiSuccess {
                artifact_id: artifact.id,
                is_manual: user_id != SYSTEM_USER_ID,
                async_mode: false,
                user_id,
            };
            tasks.spawn(async move {
                let outcome = dispatcher.handle_ci_success(request).await;
                (request.artifact_id, outcome)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((artifact_id, Err(e))) => {
                    tracing::error!(artifact_id, error = %e, "deployment dispatch failed");
                }
                Err(e) => tracing::error!(error = %e, "deployment dispatch task panicked"),
            }
        }
    }
}

/// Webhook URL stem. Read from config, else built once from the host URL
/// attribute.
pub async fn webhook_url(ctx: &CiContext, uow: &mut dyn UnitOfWork) -> EngineResult<String> {
    if let Some(url) = ctx.webhook_url.read().await.as_ref() {
        return Ok(url.clone());
    }

    let mut slot = ctx.webhook_url.write().await;
    if let Some(url) = slot.as_ref() {
        return Ok(url.clone());
    }
    let host = uow
        .find_attribute(Attribute::HOST_URL)
        .await?
        .map(|a| a.value)
        .unwrap_or_default();
    let url = format!("{}/{EXTERNAL_CI_WEBHOOK_PATH}", host.trim_end_matches('/'));
    tracing::debug!(webhook_url = %url, "external ci webhook url resolved");
    *slot = Some(url.clone());
    Ok(url)
}

/// Stores a new host URL and drops the cached webhook stem unless it is
/// pinned by configuration.
pub async fn update_host_url(ctx: &CiContext, url: &str) -> EngineResult<()> {
    let url = url.trim();
    if url.is_empty() {
        return Err(EngineError::invalid("host url is required"));
    }

    let mut uow = ctx.store.begin().await?;
    let result = uow
        .upsert_attribute(Attribute {
            key: Attribute::HOST_URL.to_string(),
            value: url.to_string(),
            active: true,
        })
        .await
        .map_err(EngineError::from);
    finish(uow, result).await?;

    if ctx.config.external_ci_web_hook_url.is_empty() {
        *ctx.webhook_url.write().await = None;
    }
    tracing::info!(host_url = %url, "host url updated");
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalCiConfig {
    pub id: i64,
    pub app_id: i64,
    pub ci_pipeline_id: i64,
    pub webhook_url: String,
    pub schema: serde_json::Value,
}

/// Payload shape external CIs are told to post.
pub fn payload_schema() -> serde_json::Value {
    serde_json::json!({
        "dockerImage": "string",
        "ciProjectDetails": [{
            "commitHash": "string",
            "commitTime": "string",
            "message": "string",
            "author": "string",
        }],
    })
}

pub async fn external_ci_config(
    ctx: &CiContext,
    app_id: i64,
    external_ci_id: i64,
) -> EngineResult<ExternalCiConfig> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let endpoint = uow
            .find_external_ci(external_ci_id)
            .await?
            .filter(|e| e.active && e.app_id == app_id)
            .ok_or_else(|| EngineError::not_found("external ci endpoint", external_ci_id))?;
        let stem = webhook_url(ctx, uow.as_mut()).await?;
        Ok(ExternalCiConfig {
            id: endpoint.id,
            app_id: endpoint.app_id,
            ci_pipeline_id: endpoint.ci_pipeline_id,
            webhook_url: format!("{stem}/{}", endpoint.id),
            schema: payload_schema(),
        })
    }
    .await;
    finish(uow, result).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn access_key_round_trips_through_parse() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let token = access_token("s3cret", 10, "ext", at);
        assert_eq!(token.len(), 64);
        let key = access_key(10, &token);
        assert!(key.starts_with("MTA=."));
        assert_eq!(parse_access_key(&key), Some((10, token.as_str())));
    }

    #[test]
    fn token_depends_on_secret_and_name() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let base = access_token("a", 10, "ext", at);
        assert_ne!(base, access_token("b", 10, "ext", at));
        assert_ne!(base, access_token("a", 10, "ext2", at));
        assert_eq!(base, access_token("a", 10, "ext", at));
    }

    #[test]
    fn malformed_keys_do_not_parse() {
        assert_eq!(parse_access_key("no-dot"), None);
        assert_eq!(parse_access_key("!!!.abc"), None);
        // base64 of "ten"
        assert_eq!(parse_access_key("dGVu.abc"), None);
    }

    #[test]
    fn constant_time_eq_checks_length_and_content() {
        assert!(constant_time_eq(b"abcd", b"abcd"));
        assert!(!constant_time_eq(b"abcd", b"abce"));
        assert!(!constant_time_eq(b"abcd", b"abc"));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[test]
    fn webhook_payload_accepts_advertised_names() {
        let payload: ArtifactWebhook = serde_json::from_value(serde_json::json!({
            "dockerImage": "r/i:v1",
            "ciProjectDetails": [{"commitHash": "abc"}]
        }))
        .unwrap();
        assert_eq!(payload.image, "r/i:v1");
        assert!(payload.material_info.is_array());
        assert_eq!(payload.user_id, None);
    }
}
