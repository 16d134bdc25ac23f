use serde::{Deserialize, Serialize};

use auditflow_core::{ParameterSetId, TenantId};

/// One weighted criterion of a scoring rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditParameter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Relative weight (0-100) of this criterion in the overall score.
    pub weight: u32,
    /// A fatal criterion zeroes the overall score when it fails.
    #[serde(default)]
    pub fatal: bool,
}

/// Scoring rubric applied to every job in a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSet {
    pub id: ParameterSetId,
    pub tenant_id: TenantId,
    pub name: String,
    pub parameters: Vec<AuditParameter>,
}

impl ParameterSet {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, parameters: Vec<AuditParameter>) -> Self {
        Self {
            id: ParameterSetId::new(),
            tenant_id,
            name: name.into(),
            parameters,
        }
    }

    pub fn total_weight(&self) -> u32 {
        self.parameters.iter().map(|p| p.weight).sum()
    }

    pub fn parameter(&self, id: &str) -> Option<&AuditParameter> {
        self.parameters.iter().find(|p| p.id == id)
    }
}

impl AuditParameter {
    pub fn new(id: impl Into<String>, name: impl Into<String>, weight: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            weight,
            fatal: false,
        }
    }

    pub fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}
