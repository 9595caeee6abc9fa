use async_trait::async_trait;
use tracing::debug;

use super::TransactionalSink;
use crate::batch::Batch;
use crate::error::CommitError;
use crate::schema::Resource;

/// Validates batches against the schema without writing anywhere
#[derive(Debug, Default)]
pub struct DryRunSink {
    validated: u64,
}

impl DryRunSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows that passed validation so far
    pub fn validated(&self) -> u64 {
        self.validated
    }
}

#[async_trait]
impl TransactionalSink for DryRunSink {
    async fn commit(&mut self, batch: Batch, resource: &Resource) -> Result<u64, CommitError> {
        let rows = match resource.schema.coerce_batch(&batch) {
            Ok(rows) => rows.len() as u64,
            Err(violation) => return Err(CommitError::new(&resource.name, batch, violation)),
        };

        debug!(
            resource = %resource.name,
            batch = batch.sequence(),
            rows,
            "Dry run: batch validated"
        );
        self.validated += rows;
        Ok(rows)
    }

    fn name(&self) -> &'static str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batcher;
    use crate::error::CommitCause;
    use crate::record::{FieldValue, Record};
    use crate::schema::{ColumnSpec, ColumnType, ResourceSchema};
    use std::num::NonZeroUsize;

    fn resource() -> Resource {
        Resource::new(
            "orders",
            ResourceSchema::new("orders", vec![ColumnSpec::new("qty", ColumnType::Integer)]),
        )
    }

    fn batch(values: &[&str]) -> Batch {
        let mut batcher = Batcher::new(NonZeroUsize::new(values.len() + 1).unwrap());
        for v in values {
            assert!(batcher.push(Record::from_pairs(vec![("qty", FieldValue::from(*v))])).is_none());
        }
        batcher.finish().unwrap()
    }

    #[tokio::test]
    async fn test_counts_valid_rows() {
        let mut sink = DryRunSink::new();
        assert_eq!(sink.commit(batch(&["1", "2"]), &resource()).await.unwrap(), 2);
        assert_eq!(sink.commit(batch(&["3"]), &resource()).await.unwrap(), 1);
        assert_eq!(sink.validated(), 3);
    }

    #[tokio::test]
    async fn test_rejects_invalid_batch_whole() {
        let mut sink = DryRunSink::new();
        let err = sink.commit(batch(&["1", "x"]), &resource()).await.unwrap_err();

        assert_eq!(err.batch.len(), 2);
        assert!(matches!(err.cause, CommitCause::Schema(_)));
        assert_eq!(sink.validated(), 0);
    }
}
