//! Schema migration for the CI lifecycle tables. Idempotent; runs at startup.

use diesel_async::AsyncPgConnection;
use diesel_async::SimpleAsyncConnection;

/// SQL migration for CI lifecycle tables.
///
/// Name and checkout-path uniqueness only applies to live rows, so
/// soft-deleted pipelines and materials never block a new one.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS ci_apps (
    id              BIGSERIAL PRIMARY KEY,
    name            VARCHAR(255) NOT NULL,
    project_id      BIGINT NOT NULL DEFAULT 0,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_ci_apps_name_active ON ci_apps (name) WHERE active;

CREATE TABLE IF NOT EXISTS ci_attributes (
    key             VARCHAR(255) PRIMARY KEY,
    value           TEXT NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS ci_git_materials (
    id              BIGSERIAL PRIMARY KEY,
    app_id          BIGINT NOT NULL REFERENCES ci_apps(id),
    name            VARCHAR(255) NOT NULL,
    url             VARCHAR(1024) NOT NULL,
    checkout_path   VARCHAR(255) NOT NULL DEFAULT './',
    provider_id     BIGINT NOT NULL,
    fetch_submodules BOOLEAN NOT NULL DEFAULT FALSE,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_ci_git_materials_checkout
    ON ci_git_materials (app_id, checkout_path) WHERE active;

CREATE TABLE IF NOT EXISTS ci_app_workflows (
    id              BIGSERIAL PRIMARY KEY,
    app_id          BIGINT NOT NULL REFERENCES ci_apps(id),
    name            VARCHAR(255) NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS ci_pipelines (
    id              BIGSERIAL PRIMARY KEY,
    app_id          BIGINT NOT NULL REFERENCES ci_apps(id),
    name            VARCHAR(255) NOT NULL,
    kind            VARCHAR(32) NOT NULL,
    manual_trigger  BOOLEAN NOT NULL DEFAULT FALSE,
    scan_enabled    BOOLEAN NOT NULL DEFAULT FALSE,
    docker_args     JSONB NOT NULL DEFAULT '{}'::jsonb,
    parent_ci_id    BIGINT REFERENCES ci_pipelines(id),
    active          BOOLEAN NOT NULL DEFAULT TRUE,
    deleted         BOOLEAN NOT NULL DEFAULT FALSE,
    docker_config_overridden BOOLEAN NOT NULL DEFAULT FALSE,
    docker_config_override JSONB,
    updated_by      BIGINT NOT NULL,
    updated_on      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_ci_pipelines_app_name
    ON ci_pipelines (app_id, name) WHERE active AND NOT deleted;
CREATE INDEX IF NOT EXISTS idx_ci_pipelines_parent ON ci_pipelines (parent_ci_id);

CREATE TABLE IF NOT EXISTS ci_pipeline_materials (
    id              BIGSERIAL PRIMARY KEY,
    ci_pipeline_id  BIGINT NOT NULL REFERENCES ci_pipelines(id),
    git_material_id BIGINT NOT NULL REFERENCES ci_git_materials(id),
    source_type     VARCHAR(32) NOT NULL,
    value           VARCHAR(255) NOT NULL DEFAULT '',
    regex           VARCHAR(255) NOT NULL DEFAULT '',
    scm_id          VARCHAR(255),
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE INDEX IF NOT EXISTS idx_ci_pipeline_materials_pipeline
    ON ci_pipeline_materials (ci_pipeline_id);
CREATE INDEX IF NOT EXISTS idx_ci_pipeline_materials_git
    ON ci_pipeline_materials (git_material_id);

CREATE TABLE IF NOT EXISTS ci_external_endpoints (
    id              BIGSERIAL PRIMARY KEY,
    app_id          BIGINT NOT NULL REFERENCES ci_apps(id),
    ci_pipeline_id  BIGINT NOT NULL REFERENCES ci_pipelines(id),
    access_token    VARCHAR(128) NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE INDEX IF NOT EXISTS idx_ci_external_endpoints_pipeline
    ON ci_external_endpoints (ci_pipeline_id);

CREATE TABLE IF NOT EXISTS ci_workflow_mappings (
    id              BIGSERIAL PRIMARY KEY,
    workflow_id     BIGINT NOT NULL REFERENCES ci_app_workflows(id),
    parent_id       BIGINT NOT NULL DEFAULT 0,
    parent_kind     VARCHAR(32),
    child_id        BIGINT NOT NULL,
    child_kind      VARCHAR(32) NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE INDEX IF NOT EXISTS idx_ci_workflow_mappings_workflow ON ci_workflow_mappings (workflow_id);
CREATE INDEX IF NOT EXISTS idx_ci_workflow_mappings_parent
    ON ci_workflow_mappings (parent_id, parent_kind);
CREATE INDEX IF NOT EXISTS idx_ci_workflow_mappings_child
    ON ci_workflow_mappings (child_id, child_kind);

CREATE TABLE IF NOT EXISTS ci_cd_pipelines (
    id              BIGSERIAL PRIMARY KEY,
    app_id          BIGINT NOT NULL REFERENCES ci_apps(id),
    ci_pipeline_id  BIGINT NOT NULL DEFAULT 0,
    name            VARCHAR(255) NOT NULL,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS ci_workflow_runs (
    id              BIGSERIAL PRIMARY KEY,
    ci_pipeline_id  BIGINT NOT NULL REFERENCES ci_pipelines(id),
    name            VARCHAR(255) NOT NULL,
    status          VARCHAR(32) NOT NULL,
    pod_status      VARCHAR(32) NOT NULL DEFAULT '',
    pod_name        VARCHAR(255) NOT NULL DEFAULT '',
    namespace       VARCHAR(255) NOT NULL DEFAULT '',
    message         TEXT NOT NULL DEFAULT '',
    started_on      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    finished_on     TIMESTAMPTZ,
    log_location    TEXT,
    git_triggers    JSONB NOT NULL DEFAULT '{}'::jsonb,
    artifact_id     BIGINT,
    is_artifact_uploaded BOOLEAN,
    blob_storage_enabled BOOLEAN NOT NULL DEFAULT FALSE,
    executor_type   VARCHAR(32) NOT NULL DEFAULT 'SYSTEM',
    triggered_by    BIGINT NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_ci_workflow_runs_pipeline ON ci_workflow_runs (ci_pipeline_id, id DESC);
CREATE INDEX IF NOT EXISTS idx_ci_workflow_runs_status ON ci_workflow_runs (status, started_on);

CREATE TABLE IF NOT EXISTS ci_artifacts (
    id              BIGSERIAL PRIMARY KEY,
    image           VARCHAR(512) NOT NULL,
    image_digest    VARCHAR(255) NOT NULL DEFAULT '',
    material_info   TEXT NOT NULL DEFAULT '',
    data_source     VARCHAR(32) NOT NULL,
    pipeline_id     BIGINT NOT NULL,
    workflow_run_id BIGINT REFERENCES ci_workflow_runs(id),
    parent_artifact_id BIGINT REFERENCES ci_artifacts(id),
    external_ci_id  BIGINT,
    scan_enabled    BOOLEAN NOT NULL DEFAULT FALSE,
    scanned         BOOLEAN NOT NULL DEFAULT FALSE,
    is_artifact_uploaded BOOLEAN NOT NULL DEFAULT FALSE,
    created_by      BIGINT NOT NULL,
    created_on      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_ci_artifacts_parent ON ci_artifacts (parent_artifact_id);

CREATE TABLE IF NOT EXISTS ci_custom_tags (
    id              BIGSERIAL PRIMARY KEY,
    entity_key      VARCHAR(64) NOT NULL,
    entity_value    VARCHAR(64) NOT NULL,
    tag_pattern     VARCHAR(255) NOT NULL,
    auto_increasing_number BIGINT NOT NULL DEFAULT 0,
    enabled         BOOLEAN NOT NULL DEFAULT TRUE,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_ci_custom_tags_entity
    ON ci_custom_tags (entity_key, entity_value) WHERE active;

CREATE TABLE IF NOT EXISTS ci_pipeline_stages (
    id              BIGSERIAL PRIMARY KEY,
    ci_pipeline_id  BIGINT NOT NULL REFERENCES ci_pipelines(id),
    stage_type      VARCHAR(16) NOT NULL,
    steps           JSONB NOT NULL DEFAULT '[]'::jsonb,
    active          BOOLEAN NOT NULL DEFAULT TRUE
);

CREATE TABLE IF NOT EXISTS ci_pipeline_history (
    id              BIGSERIAL PRIMARY KEY,
    ci_pipeline_id  BIGINT NOT NULL REFERENCES ci_pipelines(id),
    trigger         VARCHAR(16) NOT NULL,
    snapshot        JSONB NOT NULL,
    created_by      BIGINT NOT NULL,
    created_on      TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_ci_pipeline_history_pipeline ON ci_pipeline_history (ci_pipeline_id);
"#;

/// Run the CI lifecycle migration.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL).await?;
    tracing::info!("CI lifecycle tables migrated");
    Ok(())
}
