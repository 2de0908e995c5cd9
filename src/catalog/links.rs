//! Batched link persistence.

use tracing::{debug, instrument};

use super::{Catalog, Owner, Result, StoredLink};
use crate::links::LinkRecord;

impl Catalog {
    /// Inserts an owner's links in one transaction, skipping existing ones.
    ///
    /// Server and quality ids are resolved (and created) first, outside the
    /// transaction. Each link is then inserted unless its
    /// `(owner, server, language, url)` key already exists. Any failure rolls
    /// back the whole batch.
    ///
    /// Returns the number of rows actually inserted.
    ///
    /// # Errors
    ///
    /// Returns [`super::CatalogError::Database`] if a query or the commit fails.
    #[instrument(skip(self, links), fields(owner = %owner, links = links.len()))]
    pub async fn insert_links_batch(&self, owner: Owner, links: &[LinkRecord]) -> Result<u64> {
        if links.is_empty() {
            return Ok(0);
        }

        let mut rows = Vec::with_capacity(links.len());
        for link in links {
            let server_id = self.server_id(&link.server).await?;
            let quality_id = self.quality_id(link.quality.label()).await?;
            rows.push((link, server_id, quality_id));
        }

        let (media_item_id, episode_id) = owner.bind_values();
        let mut tx = self.db.pool().begin().await?;
        let mut inserted = 0u64;

        for (link, server_id, quality_id) in rows {
            let result = sqlx::query(
                r"INSERT INTO links (media_item_id, episode_id, server_id, quality_id, language, url)
                  VALUES (?, ?, ?, ?, ?, ?)
                  ON CONFLICT DO NOTHING",
            )
            .bind(media_item_id)
            .bind(episode_id)
            .bind(server_id)
            .bind(quality_id)
            .bind(link.language.as_str())
            .bind(&link.url)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!(inserted, skipped = links.len() as u64 - inserted, "link batch committed");
        Ok(inserted)
    }

    /// Returns an owner's links, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`super::CatalogError::Database`] if the query fails.
    pub async fn links_for(&self, owner: Owner) -> Result<Vec<StoredLink>> {
        let (media_item_id, episode_id) = owner.bind_values();
        let links = sqlx::query_as::<_, StoredLink>(
            r"SELECT l.id, s.name AS server, q.label AS quality, l.language, l.url
              FROM links l
              JOIN servers s ON s.id = l.server_id
              JOIN qualities q ON q.id = l.quality_id
              WHERE l.media_item_id IS ? AND l.episode_id IS ?
              ORDER BY l.id",
        )
        .bind(media_item_id)
        .bind(episode_id)
        .fetch_all(self.db.pool())
        .await?;
        Ok(links)
    }
}
