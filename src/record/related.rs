//! Related items: activity history, notes, and attachments hanging off
//! records. Merges move these rows wholesale to the surviving record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::record::store::RecordStore;
use crate::storage::related_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelatedKind {
    Activity,
    Note,
    Attachment,
}

impl RelatedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelatedKind::Activity => "activity",
            RelatedKind::Note => "note",
            RelatedKind::Attachment => "attachment",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedItem {
    pub id: u64,
    pub kind: RelatedKind,
    pub module_id: u64,
    pub record_id: u64,
    pub title: String,
    pub body: Option<String>,
    pub created_by: Option<u64>,
    pub created_at: DateTime<Utc>,
}

/// Input for `attach_related`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRelatedItem {
    pub kind: RelatedKind,
    pub title: String,
    pub body: Option<String>,
    pub created_by: Option<u64>,
}

impl NewRelatedItem {
    pub fn new(kind: RelatedKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: None,
            created_by: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn by(mut self, user_id: u64) -> Self {
        self.created_by = Some(user_id);
        self
    }
}

impl RecordStore {
    /// Attaches a related item to a live record.
    pub fn attach_related(
        &self,
        module_id: u64,
        record_id: u64,
        input: NewRelatedItem,
    ) -> CoreResult<RelatedItem> {
        self.find_by_id(module_id, record_id)?;
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(CoreError::validation("related item title must not be empty"));
        }
        let item = RelatedItem {
            id: self.storage.next_id()?,
            kind: input.kind,
            module_id,
            record_id,
            title,
            body: input.body,
            created_by: input.created_by,
            created_at: Utc::now(),
        };
        self.storage.put(
            &self.storage.related_items,
            &related_key(item.kind.as_str(), item.id),
            &item,
        )?;
        Ok(item)
    }

    /// A record's related items in creation order.
    pub fn related_for_record(
        &self,
        module_id: u64,
        record_id: u64,
    ) -> CoreResult<Vec<RelatedItem>> {
        let items: Vec<RelatedItem> = self.storage.list(&self.storage.related_items)?;
        let mut items: Vec<RelatedItem> = items
            .into_iter()
            .filter(|i| i.module_id == module_id && i.record_id == record_id)
            .collect();
        items.sort_by_key(|i| i.id);
        Ok(items)
    }
}
