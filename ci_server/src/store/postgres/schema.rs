//! Diesel table definitions for the CI lifecycle engine.
//!
//! Tables: ci_apps, ci_attributes, ci_git_materials, ci_app_workflows,
//! ci_pipelines, ci_pipeline_materials, ci_external_endpoints,
//! ci_workflow_mappings, ci_cd_pipelines, ci_workflow_runs, ci_artifacts,
//! ci_custom_tags, ci_pipeline_stages, ci_pipeline_history.

diesel::table! {
    ci_apps (id) {
        id -> Int8,
        name -> Varchar,
        project_id -> Int8,
        active -> Bool,
    }
}

diesel::table! {
    ci_attributes (key) {
        key -> Varchar,
        value -> Text,
        active -> Bool,
    }
}

diesel::table! {
    ci_git_materials (id) {
        id -> Int8,
        app_id -> Int8,
        name -> Varchar,
        url -> Varchar,
        checkout_path -> Varchar,
        provider_id -> Int8,
        fetch_submodules -> Bool,
        active -> Bool,
    }
}

diesel::table! {
    ci_app_workflows (id) {
        id -> Int8,
        app_id -> Int8,
        name -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    ci_pipelines (id) {
        id -> Int8,
        app_id -> Int8,
        name -> Varchar,
        kind -> Varchar,
        manual_trigger -> Bool,
        scan_enabled -> Bool,
        docker_args -> Jsonb,
        parent_ci_id -> Nullable<Int8>,
        active -> Bool,
        deleted -> Bool,
        docker_config_overridden -> Bool,
        docker_config_override -> Nullable<Jsonb>,
        updated_by -> Int8,
        updated_on -> Timestamptz,
    }
}

diesel::table! {
    ci_pipeline_materials (id) {
        id -> Int8,
        ci_pipeline_id -> Int8,
        git_material_id -> Int8,
        source_type -> Varchar,
        value -> Varchar,
        regex -> Varchar,
        scm_id -> Nullable<Varchar>,
        active -> Bool,
    }
}

diesel::table! {
    ci_external_endpoints (id) {
        id -> Int8,
        app_id -> Int8,
        ci_pipeline_id -> Int8,
        access_token -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    ci_workflow_mappings (id) {
        id -> Int8,
        workflow_id -> Int8,
        parent_id -> Int8,
        parent_kind -> Nullable<Varchar>,
        child_id -> Int8,
        child_kind -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    ci_cd_pipelines (id) {
        id -> Int8,
        app_id -> Int8,
        ci_pipeline_id -> Int8,
        name -> Varchar,
        active -> Bool,
    }
}

diesel::table! {
    ci_workflow_runs (id) {
        id -> Int8,
        ci_pipeline_id -> Int8,
        name -> Varchar,
        status -> Varchar,
        pod_status -> Varchar,
        pod_name -> Varchar,
        namespace -> Varchar,
        message -> Text,
        started_on -> Timestamptz,
        finished_on -> Nullable<Timestamptz>,
        log_location -> Nullable<Text>,
        git_triggers -> Jsonb,
        artifact_id -> Nullable<Int8>,
        is_artifact_uploaded -> Nullable<Bool>,
        blob_storage_enabled -> Bool,
        executor_type -> Varchar,
        triggered_by -> Int8,
    }
}

diesel::table! {
    ci_artifacts (id) {
        id -> Int8,
        image -> Varchar,
        image_digest -> Varchar,
        material_info -> Text,
        data_source -> Varchar,
        pipeline_id -> Int8,
        workflow_run_id -> Nullable<Int8>,
        parent_artifact_id -> Nullable<Int8>,
        external_ci_id -> Nullable<Int8>,
        scan_enabled -> Bool,
        scanned -> Bool,
        is_artifact_uploaded -> Bool,
        created_by -> Int8,
        created_on -> Timestamptz,
    }
}

diesel::table! {
    ci_custom_tags (id) {
        id -> Int8,
        entity_key -> Varchar,
        entity_value -> Varchar,
        tag_pattern -> Varchar,
        auto_increasing_number -> Int8,
        enabled -> Bool,
        active -> Bool,
    }
}

diesel::table! {
    ci_pipeline_stages (id) {
        id -> Int8,
        ci_pipeline_id -> Int8,
        stage_type -> Varchar,
        steps -> Jsonb,
        active -> Bool,
    }
}

diesel::table! {
    ci_pipeline_history (id) {
        id -> Int8,
        ci_pipeline_id -> Int8,
        trigger -> Varchar,
        snapshot -> Jsonb,
        created_by -> Int8,
        created_on -> Timestamptz,
    }
}
