use async_trait::async_trait;
use std::sync::Arc;

pub mod generator;

pub use generator::TopicWriter;

use crate::store::{StorageError, TopicCandidate, TopicStore};
use crate::Result;

/// Source of new topic candidates. Best effort: may return fewer than asked.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TopicGenerator: Send + Sync {
    async fn generate_topics(&self, count: usize) -> Result<Vec<TopicCandidate>>;
}

#[derive(thiserror::Error, Debug)]
pub enum SupplyError {
    #[error("topic generation failed on all {attempts} batch attempt(s): {last_error}")]
    Exhausted { attempts: usize, last_error: String },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Requests new topics in size-limited batches and merges them into the store
#[derive(Clone)]
pub struct TopicSupplier {
    generator: Arc<dyn TopicGenerator>,
    replenish_count: usize,
    batch_size: usize,
}

impl TopicSupplier {
    pub fn new(generator: Arc<dyn TopicGenerator>, replenish_count: usize, batch_size: usize) -> Self {
        Self {
            generator,
            replenish_count,
            batch_size: batch_size.max(1),
        }
    }

    /// Collect up to `total` candidates using `ceil(total / batch_size)` generation calls.
    ///
    /// A failed batch is logged and skipped. The result may be shorter than `total`;
    /// it is an error only when every batch call failed.
    pub async fn fill_batch(&self, total: usize, batch_size: usize) -> std::result::Result<Vec<TopicCandidate>, SupplyError> {
        let batch_size = batch_size.max(1);
        let batches = total.div_ceil(batch_size);
        let mut collected: Vec<TopicCandidate> = Vec::with_capacity(total);
        let mut succeeded = 0;
        let mut attempts = 0;
        let mut last_error = None;

        for i in 0..batches {
            let count = batch_size.min(total - collected.len());
            tracing::info!("Generating batch {}/{} ({} topics)...", i + 1, batches, count);
            attempts += 1;

            match self.generator.generate_topics(count).await {
                Ok(topics) => {
                    succeeded += 1;
                    collected.extend(topics);
                }
                Err(e) => {
                    tracing::warn!(batch = i + 1, "Topic batch failed: {:#}", e);
                    last_error = Some(format!("{:#}", e));
                }
            }

            if collected.len() >= total {
                break;
            }
        }

        if succeeded == 0 {
            if let Some(last_error) = last_error {
                return Err(SupplyError::Exhausted { attempts, last_error });
            }
        }

        collected.truncate(total);
        Ok(collected)
    }

    /// Generate the configured number of topics and store the novel ones.
    ///
    /// Returns how many were actually inserted.
    pub async fn replenish(&self, store: &TopicStore) -> std::result::Result<usize, SupplyError> {
        tracing::info!("Generating {} new topics...", self.replenish_count);

        let candidates = self.fill_batch(self.replenish_count, self.batch_size).await?;
        let added = store.add_topics(&candidates)?;

        tracing::info!(
            "Stored {} new topics ({} duplicates skipped)",
            added,
            candidates.len() - added
        );
        Ok(added)
    }
}

/// Ten ready-made topics for offline runs and smoke tests
pub fn sample_topics() -> Vec<TopicCandidate> {
    [
        ("Good Manners", "Politeness", "Saying Please"),
        ("Good Manners", "Politeness", "Saying Thank You"),
        ("Math Basics", "Counting", "Numbers 1 to 5"),
        ("Math Basics", "Shapes", "Circle and Square"),
        ("Colors & Shapes", "Colors", "Red and Blue"),
        ("Good Character", "Honesty", "Telling the Truth"),
        ("Self-Care", "Hygiene", "Washing Hands"),
        ("Time & Routine", "Daily Schedule", "Morning Routine"),
        ("Safety Basics", "Home Safety", "Being Careful"),
        ("Good Deeds", "Helping Others", "Sharing with Friends"),
    ]
    .iter()
    .filter_map(|(c, m, s)| TopicCandidate::new(c, m, s))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::temp_store;
    use mockall::predicate::eq;

    fn numbered(prefix: &str, n: usize) -> Vec<TopicCandidate> {
        (0..n)
            .map(|i| TopicCandidate::new("Math Basics", prefix, &format!("{} {}", prefix, i)).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_fill_batch_issues_ceil_batches() {
        let mut generator = MockTopicGenerator::new();
        generator.expect_generate_topics().with(eq(50)).times(4).returning({
            let mut call = 0;
            move |n| {
                call += 1;
                Ok(numbered(&format!("b{}", call), n))
            }
        });

        let supplier = TopicSupplier::new(Arc::new(generator), 200, 50);
        let topics = supplier.fill_batch(200, 50).await.unwrap();
        assert_eq!(topics.len(), 200);
    }

    #[tokio::test]
    async fn test_fill_batch_last_batch_is_remainder() {
        let mut generator = MockTopicGenerator::new();
        generator.expect_generate_topics().with(eq(50)).times(2).returning(|n| Ok(numbered("x", n)));
        generator.expect_generate_topics().with(eq(20)).times(1).returning(|n| Ok(numbered("y", n)));

        let supplier = TopicSupplier::new(Arc::new(generator), 120, 50);
        assert_eq!(supplier.fill_batch(120, 50).await.unwrap().len(), 120);
    }

    #[tokio::test]
    async fn test_fill_batch_stops_early_and_truncates() {
        let mut generator = MockTopicGenerator::new();
        // Over-delivers on the first call
        generator.expect_generate_topics().times(1).returning(|_| Ok(numbered("big", 120)));

        let supplier = TopicSupplier::new(Arc::new(generator), 100, 50);
        assert_eq!(supplier.fill_batch(100, 50).await.unwrap().len(), 100);
    }

    #[tokio::test]
    async fn test_fill_batch_skips_failed_batches() {
        let mut generator = MockTopicGenerator::new();
        let mut call = 0;
        generator.expect_generate_topics().times(3).returning(move |n| {
            call += 1;
            if call == 2 {
                anyhow::bail!("rate limited")
            }
            Ok(numbered(&format!("c{}", call), n))
        });

        let supplier = TopicSupplier::new(Arc::new(generator), 30, 10);
        let topics = supplier.fill_batch(30, 10).await.unwrap();
        assert_eq!(topics.len(), 20);
    }

    #[tokio::test]
    async fn test_fill_batch_under_delivery_is_not_an_error() {
        let mut generator = MockTopicGenerator::new();
        generator.expect_generate_topics().times(2).returning(|_| Ok(Vec::new()));

        let supplier = TopicSupplier::new(Arc::new(generator), 20, 10);
        assert!(supplier.fill_batch(20, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fill_batch_fails_when_every_batch_fails() {
        let mut generator = MockTopicGenerator::new();
        generator.expect_generate_topics().times(2).returning(|_| Err(anyhow::anyhow!("backend down")));

        let supplier = TopicSupplier::new(Arc::new(generator), 20, 10);
        let err = supplier.fill_batch(20, 10).await.unwrap_err();
        assert!(matches!(err, SupplyError::Exhausted { attempts: 2, .. }));
        assert!(err.to_string().contains("backend down"));
    }

    #[tokio::test]
    async fn test_replenish_stores_only_new_topics() {
        let (_dir, store) = temp_store();
        store.add_topics(&numbered("seen", 3)).unwrap();

        let mut generator = MockTopicGenerator::new();
        generator.expect_generate_topics().times(1).returning(|_| Ok(numbered("seen", 5)));

        let supplier = TopicSupplier::new(Arc::new(generator), 5, 50);
        assert_eq!(supplier.replenish(&store).await.unwrap(), 2);
        assert_eq!(store.total_count().unwrap(), 5);
    }

    #[test]
    fn test_sample_topics_are_unique() {
        let topics = sample_topics();
        assert_eq!(topics.len(), 10);
        let unique: std::collections::HashSet<_> = topics.iter().collect();
        assert_eq!(unique.len(), 10);
    }
}
