//! In-memory stores for tests and single-process development.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use auditflow_ai::ParameterSet;
use auditflow_campaigns::{AuditRecord, Campaign, CampaignCommand, CampaignFilter, CampaignStatus};
use auditflow_core::{AuditId, CampaignId, Page, PageRequest, ParameterSetId};

use super::{Applied, AuditResultStore, CampaignStore, ParameterSetStore, StoreError};

fn poisoned() -> StoreError {
    StoreError::Storage("lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryCampaignStore {
    campaigns: RwLock<HashMap<CampaignId, Campaign>>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn insert(&self, campaign: Campaign) -> Result<(), StoreError> {
        let mut map = self.campaigns.write().map_err(|_| poisoned())?;
        if map.contains_key(&campaign.id) {
            return Err(StoreError::Storage(format!(
                "campaign {} already exists",
                campaign.id
            )));
        }
        map.insert(campaign.id, campaign);
        Ok(())
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, StoreError> {
        let map = self.campaigns.read().map_err(|_| poisoned())?;
        Ok(map.get(&id).cloned())
    }

    async fn list(
        &self,
        filter: &CampaignFilter,
        page: PageRequest,
    ) -> Result<Page<Campaign>, StoreError> {
        let map = self.campaigns.read().map_err(|_| poisoned())?;
        let mut matching: Vec<Campaign> = map.values().filter(|c| filter.matches(c)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(Page::from_vec(matching, page))
    }

    async fn delete(&self, id: CampaignId) -> Result<bool, StoreError> {
        let mut map = self.campaigns.write().map_err(|_| poisoned())?;
        Ok(map.remove(&id).is_some())
    }

    async fn list_with_unqueued_jobs(&self, limit: usize) -> Result<Vec<Campaign>, StoreError> {
        let map = self.campaigns.read().map_err(|_| poisoned())?;
        let mut found: Vec<Campaign> = map
            .values()
            .filter(|c| matches!(c.status, CampaignStatus::Pending | CampaignStatus::Processing))
            .filter(|c| c.jobs.iter().any(|j| j.is_unqueued()))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        found.truncate(limit);
        Ok(found)
    }

    async fn apply(&self, id: CampaignId, command: CampaignCommand) -> Result<Applied, StoreError> {
        let mut map = self.campaigns.write().map_err(|_| poisoned())?;
        let current = map.get(&id).ok_or(StoreError::NotFound(id))?;

        // Work on a copy so a rejected command leaves the stored campaign untouched.
        let mut campaign = current.clone();
        let outcome = campaign.execute(command, Utc::now())?;
        map.insert(id, campaign.clone());

        Ok(Applied { campaign, outcome })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAuditResultStore {
    records: RwLock<HashMap<(CampaignId, usize), AuditRecord>>,
}

impl InMemoryAuditResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditResultStore for InMemoryAuditResultStore {
    async fn upsert(&self, mut record: AuditRecord) -> Result<AuditId, StoreError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let key = (record.campaign_id, record.job_index);
        if let Some(existing) = records.get(&key) {
            record.id = existing.id;
        }
        let id = record.id;
        records.insert(key, record);
        Ok(id)
    }

    async fn get(&self, id: AuditId) -> Result<Option<AuditRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.values().find(|r| r.id == id).cloned())
    }

    async fn list_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut out: Vec<AuditRecord> = records
            .values()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.job_index);
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryParameterSetStore {
    sets: RwLock<HashMap<ParameterSetId, ParameterSet>>,
}

impl InMemoryParameterSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remove(&self, id: ParameterSetId) -> bool {
        self.sets
            .write()
            .map(|mut s| s.remove(&id).is_some())
            .unwrap_or(false)
    }
}

#[async_trait]
impl ParameterSetStore for InMemoryParameterSetStore {
    async fn get(&self, id: ParameterSetId) -> Result<Option<ParameterSet>, StoreError> {
        let sets = self.sets.read().map_err(|_| poisoned())?;
        Ok(sets.get(&id).cloned())
    }

    async fn insert(&self, parameter_set: ParameterSet) -> Result<(), StoreError> {
        let mut sets = self.sets.write().map_err(|_| poisoned())?;
        sets.insert(parameter_set.id, parameter_set);
        Ok(())
    }
}
