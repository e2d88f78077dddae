use super::{MAPPED_RESULTS_BY_DOCUMENT_TABLE, MAPPED_RESULTS_TABLE, compound_key, compound_prefix};
use crate::core::{Etag, Result};
use crate::storage::generator::EtagGenerator;
use crate::storage::view::StorageView;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Output of a map function for one document under one reduce key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedResult {
    pub index: String,
    pub document_id: String,
    pub reduce_key: String,
    pub etag: Etag,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

pub struct MapReduceStorageActions {
    view: StorageView,
    generator: Arc<EtagGenerator>,
}

impl MapReduceStorageActions {
    pub fn new(view: StorageView, generator: Arc<EtagGenerator>) -> Self {
        Self { view, generator }
    }

    pub fn put_mapped_result(
        &self,
        index: &str,
        document_id: &str,
        reduce_key: &str,
        data: JsonValue,
    ) -> Result<Etag> {
        let etag = self.generator.create_sequential_etag();
        let result = MappedResult {
            index: index.to_string(),
            document_id: document_id.to_string(),
            reduce_key: reduce_key.to_string(),
            etag,
            data,
            timestamp: Utc::now(),
        };
        self.view.put_as(
            MAPPED_RESULTS_TABLE,
            &compound_key(&[index, reduce_key, document_id]),
            &result,
            None,
        )?;
        self.view.put(
            MAPPED_RESULTS_BY_DOCUMENT_TABLE,
            &compound_key(&[index, document_id, reduce_key]),
            json!(reduce_key),
            None,
        )?;
        Ok(etag)
    }

    pub fn mapped_results(&self, index: &str, reduce_key: &str) -> Result<Vec<MappedResult>> {
        Ok(self
            .view
            .scan_prefix_as::<MappedResult>(MAPPED_RESULTS_TABLE, &compound_prefix(&[index, reduce_key]))?
            .into_iter()
            .map(|(_, result)| result)
            .collect())
    }

    /// Drop every mapped result the document produced for `index`.
    ///
    /// Returns the reduce keys that need to be reduced again.
    pub fn delete_mapped_results_for_document(&self, index: &str, document_id: &str) -> Result<BTreeSet<String>> {
        let entries = self
            .view
            .scan_prefix(MAPPED_RESULTS_BY_DOCUMENT_TABLE, &compound_prefix(&[index, document_id]))?;

        let mut reduce_keys = BTreeSet::new();
        for (key, value) in entries {
            let Some(reduce_key) = value.as_str() else {
                continue;
            };
            self.view.delete(MAPPED_RESULTS_BY_DOCUMENT_TABLE, &key, None)?;
            self.view.delete(
                MAPPED_RESULTS_TABLE,
                &compound_key(&[index, reduce_key, document_id]),
                None,
            )?;
            reduce_keys.insert(reduce_key.to_string());
        }
        Ok(reduce_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{TableStorage, WriteBatch};
    use std::sync::Mutex;

    #[test]
    fn test_delete_for_document_reports_reduce_keys() {
        let storage = TableStorage::new();
        let map_reduce = MapReduceStorageActions::new(
            StorageView::new(
                Arc::new(storage.snapshot().unwrap()),
                Arc::new(Mutex::new(WriteBatch::new())),
            ),
            Arc::new(EtagGenerator::new()),
        );

        map_reduce
            .put_mapped_result("Totals", "orders/1", "customers/1", json!({"total": 10}))
            .unwrap();
        map_reduce
            .put_mapped_result("Totals", "orders/1", "customers/2", json!({"total": 5}))
            .unwrap();
        map_reduce
            .put_mapped_result("Totals", "orders/10", "customers/1", json!({"total": 7}))
            .unwrap();

        assert_eq!(map_reduce.mapped_results("Totals", "customers/1").unwrap().len(), 2);

        let keys = map_reduce
            .delete_mapped_results_for_document("Totals", "orders/1")
            .unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["customers/1".to_string(), "customers/2".to_string()]
        );

        let remaining = map_reduce.mapped_results("Totals", "customers/1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].document_id, "orders/10");
        assert!(map_reduce.mapped_results("Totals", "customers/2").unwrap().is_empty());
    }
}
