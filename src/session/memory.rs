//! In-memory [`SessionStore`] for tests and throwaway runs.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::SessionStore;
use crate::error::{Result, StudyError};

pub struct InMemorySessionStore {
    records: RwLock<HashMap<String, String>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StudyError {
    StudyError::Storage("session store lock poisoned".to_string())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, user_id: &str) -> Result<Option<String>> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, state_json: &str) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.insert(user_id.to_string(), state_json.to_string());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<()> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        records.remove(user_id);
        Ok(())
    }
}
