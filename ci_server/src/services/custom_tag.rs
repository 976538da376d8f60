//! Custom image tags for CI pipelines.

use serde::{Deserialize, Serialize};

use super::context::{finish, CiContext};
use crate::error::{EngineError, EngineResult};
use crate::models::custom_tag::ENTITY_KEY_CI_PIPELINE;
use crate::models::CustomTag;
use crate::store::UnitOfWork;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomTagRequest {
    pub tag_pattern: String,
    /// Counter value the next tag starts from.
    #[serde(default, rename = "counterX")]
    pub counter_x: i64,
}

pub async fn save(
    uow: &mut dyn UnitOfWork,
    ci_pipeline_id: i64,
    req: &CustomTagRequest,
) -> EngineResult<CustomTag> {
    if !CustomTag::is_valid_pattern(&req.tag_pattern) {
        return Err(EngineError::invalid(format!(
            "tag pattern '{}' must contain exactly one {{X}} and no whitespace",
            req.tag_pattern
        )));
    }
    if req.counter_x < 0 {
        return Err(EngineError::invalid("tag counter cannot be negative"));
    }

    let key = ci_pipeline_id.to_string();
    match uow.find_custom_tag(ENTITY_KEY_CI_PIPELINE, &key).await? {
        Some(mut tag) => {
            tag.tag_pattern = req.tag_pattern.clone();
            tag.auto_increasing_number = req.counter_x;
            tag.enabled = true;
            uow.update_custom_tag(&tag).await?;
            Ok(tag)
        }
        None => Ok(uow
            .insert_custom_tag(CustomTag {
                id: 0,
                entity_key: ENTITY_KEY_CI_PIPELINE.to_string(),
                entity_value: key,
                tag_pattern: req.tag_pattern.clone(),
                auto_increasing_number: req.counter_x,
                enabled: true,
                active: true,
            })
            .await?),
    }
}

/// Disables the tag of a deleted pipeline. A missing tag is fine.
pub async fn disable(uow: &mut dyn UnitOfWork, ci_pipeline_id: i64) -> EngineResult<()> {
    let key = ci_pipeline_id.to_string();
    if let Some(mut tag) = uow.find_custom_tag(ENTITY_KEY_CI_PIPELINE, &key).await? {
        tag.enabled = false;
        uow.update_custom_tag(&tag).await?;
    }
    Ok(())
}

/// Renders the next tag of a pipeline and advances its counter.
pub async fn next_tag(ctx: &CiContext, ci_pipeline_id: i64) -> EngineResult<String> {
    let mut uow = ctx.store.begin().await?;
    let result: EngineResult<_> = async {
        let key = ci_pipeline_id.to_string();
        let mut tag = uow
            .find_custom_tag(ENTITY_KEY_CI_PIPELINE, &key)
            .await?
            .filter(|t| t.enabled)
            .ok_or_else(|| EngineError::not_found("custom tag", ci_pipeline_id))?;
        let rendered = tag.render(tag.auto_increasing_number);
        tag.auto_increasing_number += 1;
        uow.update_custom_tag(&tag).await?;
        Ok(rendered)
    }
    .await;
    finish(uow, result).await
}
