use std::collections::HashSet;

use anyhow::Context;

use crate::models::catalog::Department;

const BUILTIN: &str = include_str!("../../data/departments.json");

pub struct CatalogService;

impl CatalogService {
    /// The departments shipped with the binary.
    pub fn builtin() -> anyhow::Result<Vec<Department>> {
        Self::parse(BUILTIN)
    }

    /// Load the catalog from `path` when given, else the built-in one.
    pub async fn load(path: Option<&str>) -> anyhow::Result<Vec<Department>> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading departments file {path}"))?;
        let departments = Self::parse(&raw).with_context(|| format!("parsing {path}"))?;
        tracing::info!("loaded {} departments from {path}", departments.len());
        Ok(departments)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Vec<Department>> {
        let departments: Vec<Department> = serde_json::from_str(raw)?;

        let mut seen = HashSet::new();
        for dept in &departments {
            if !seen.insert(dept.id.as_str()) {
                anyhow::bail!("duplicate department id: {}", dept.id);
            }
            if let Some(link) = dept.links.iter().find(|l| !l.url.starts_with("http")) {
                anyhow::bail!("department {} has a non-http link: {}", dept.id, link.url);
            }
        }
        Ok(departments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_is_valid() {
        let departments = CatalogService::builtin().unwrap();
        assert!(departments.iter().any(|d| d.id == "rh"));
        let nativos = departments.iter().find(|d| d.id == "nativos").unwrap();
        assert_eq!(nativos.links.len(), 3);
    }

    #[test]
    fn duplicates_and_bad_links_are_rejected() {
        let dup = r#"[{"id":"a","name":"A"},{"id":"a","name":"B"}]"#;
        assert!(CatalogService::parse(dup).is_err());

        let bad = r#"[{"id":"a","name":"A","links":[{"label":"x","url":"ftp://x"}]}]"#;
        assert!(CatalogService::parse(bad).is_err());
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        assert!(CatalogService::load(Some("/nonexistent/departments.json")).await.is_err());
        assert!(!CatalogService::load(None).await.unwrap().is_empty());
    }
}
