use serde::{Deserialize, Serialize};

/// An external tool a department page links out to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolLink {
    pub label: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Department {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub links: Vec<ToolLink>,
}
