use tracing::info;

use eokg_common::NodeKind;

use crate::store::{GraphStore, StoreError};

/// Declare every uniqueness constraint and lookup index the ingest relies on.
/// Safe to run repeatedly.
pub async fn migrate(store: &dyn GraphStore) -> Result<(), StoreError> {
    info!("Running schema migrations...");

    let mut constraints = 0;
    let mut indexes = 0;
    for kind in NodeKind::ALL {
        let d = kind.descriptor();
        for property in d.unique {
            store.ensure_unique_constraint(kind, property).await?;
            constraints += 1;
        }
        for property in d.lookup {
            store.ensure_index(kind, property).await?;
            indexes += 1;
        }
    }

    info!(constraints, indexes, "Schema migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use eokg_common::{DOI, GLOBAL_ID, NAME_KEY, PATH, SHORT_NAME_KEY};

    #[tokio::test]
    async fn declares_keys_for_every_label() {
        let store = MemoryStore::new();
        migrate(&store).await.unwrap();
        migrate(&store).await.unwrap();

        for kind in NodeKind::ALL {
            assert!(store.has_unique_constraint(kind, GLOBAL_ID), "{kind}");
        }
        assert!(store.has_unique_constraint(NodeKind::Publication, DOI));
        assert!(store.has_unique_constraint(NodeKind::ScienceKeyword, PATH));
        assert!(store.has_unique_constraint(NodeKind::Platform, SHORT_NAME_KEY));
        assert!(store.has_index(NodeKind::ScienceKeyword, NAME_KEY));
        assert!(store.has_index(NodeKind::Dataset, SHORT_NAME_KEY));
    }
}
