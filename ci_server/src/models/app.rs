//! Applications, their git materials and workflows.

use serde::{Deserialize, Serialize};

/// Root of a tenant scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub id: i64,
    pub name: String,
    pub project_id: i64,
    pub active: bool,
}

/// A git repository checked out for every build of the app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitMaterial {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub url: String,
    pub checkout_path: String,
    pub provider_id: i64,
    pub fetch_submodules: bool,
    pub active: bool,
}

impl GitMaterial {
    /// `<providerId>-<repo basename without .git>`.
    pub fn derive_name(provider_id: i64, url: &str) -> String {
        let base = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(url);
        let base = base.strip_suffix(".git").unwrap_or(base);
        format!("{provider_id}-{base}")
    }
}

/// Container for one workflow graph of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppWorkflow {
    pub id: i64,
    pub app_id: i64,
    pub name: String,
    pub active: bool,
}

/// Process-wide key/value attribute (for example the host URL).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
    pub active: bool,
}

impl Attribute {
    pub const HOST_URL: &'static str = "url";
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(3, "https://github.com/org/service.git", "3-service")]
    #[case(1, "https://gitlab.com/org/tools/", "1-tools")]
    #[case(7, "git@github.com:org/plain", "7-plain")]
    fn git_material_name_uses_repo_basename(
        #[case] provider: i64,
        #[case] url: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(GitMaterial::derive_name(provider, url), expected);
    }
}
