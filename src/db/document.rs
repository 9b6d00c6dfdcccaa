//! Bot document chunks and similarity search

use async_trait::async_trait;

use super::{DbPool, conn};
use crate::embedding::{cosine_similarity, from_bytes, to_bytes};
use crate::store::{DocumentSearch, RetrievedChunk, SimilarityQuery};
use crate::{Error, Result};

/// Chunks scoring below this are never returned
pub const MIN_SIMILARITY: f32 = 0.2;

/// Max chunks returned per bot
pub const MAX_CHUNKS_PER_BOT: usize = 5;

/// A chunk to index
#[derive(Debug, Clone)]
pub struct DocumentChunk<'a> {
    pub bot_id: &'a str,
    pub organization_id: &'a str,
    /// Owner of a private document; `None` for documents shared with every user
    pub user_id: Option<&'a str>,
    pub document_id: i64,
    pub content: &'a str,
    pub prev_chunk: Option<i64>,
    pub next_chunk: Option<i64>,
    pub embedding: &'a [f32],
}

/// Document chunk repository
#[derive(Clone)]
pub struct DocumentRepo {
    pool: DbPool,
}

impl DocumentRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Store a chunk with its embedding, returning the chunk id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, chunk: &DocumentChunk<'_>) -> Result<i64> {
        let conn = conn(&self.pool)?;
        conn.execute(
            "INSERT INTO bot_documents
                (bot_id, organization_id, user_id, document_id, content, prev_chunk, next_chunk, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                chunk.bot_id,
                chunk.organization_id,
                chunk.user_id,
                chunk.document_id,
                chunk.content,
                chunk.prev_chunk,
                chunk.next_chunk,
                to_bytes(chunk.embedding),
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    /// Chunks of one bot ranked by similarity to either query embedding
    ///
    /// A chunk scores the better of its cosine similarity to the whole-conversation
    /// and to the message embedding.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn similar(&self, query: SimilarityQuery<'_>) -> Result<Vec<RetrievedChunk>> {
        let conn = conn(&self.pool)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, bot_id, organization_id, document_id, content, prev_chunk, next_chunk, embedding
                 FROM bot_documents
                 WHERE organization_id = ?1 AND bot_id = ?2 AND (user_id IS NULL OR user_id = ?3)",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let rows = stmt
            .query_map(
                [query.organization_id, query.bot_id, query.user_id],
                |row| {
                    let embedding = from_bytes(&row.get::<_, Vec<u8>>(7)?);
                    let similarity = cosine_similarity(&embedding, query.whole_embedding)
                        .max(cosine_similarity(&embedding, query.narrow_embedding));
                    Ok(RetrievedChunk {
                        id: row.get(0)?,
                        bot_id: row.get(1)?,
                        organization_id: row.get(2)?,
                        document_id: row.get(3)?,
                        content: row.get(4)?,
                        prev_chunk: row.get(5)?,
                        next_chunk: row.get(6)?,
                        similarity,
                    })
                },
            )
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut chunks: Vec<RetrievedChunk> = rows
            .into_iter()
            .filter(|c| c.similarity >= MIN_SIMILARITY)
            .collect();
        chunks.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        chunks.truncate(MAX_CHUNKS_PER_BOT);

        tracing::trace!(bot = query.bot_id, found = chunks.len(), "similarity search");
        Ok(chunks)
    }
}

/// Runs the scan on the blocking pool so concurrent legs overlap and a timed-out leg is
/// abandoned instead of holding the runtime worker
#[async_trait]
impl DocumentSearch for DocumentRepo {
    async fn search(&self, query: SimilarityQuery<'_>) -> Result<Vec<RetrievedChunk>> {
        let repo = self.clone();
        let organization_id = query.organization_id.to_string();
        let bot_id = query.bot_id.to_string();
        let user_id = query.user_id.to_string();
        let whole_embedding = query.whole_embedding.to_vec();
        let narrow_embedding = query.narrow_embedding.to_vec();

        tokio::task::spawn_blocking(move || {
            repo.similar(SimilarityQuery {
                organization_id: &organization_id,
                bot_id: &bot_id,
                user_id: &user_id,
                whole_embedding: &whole_embedding,
                narrow_embedding: &narrow_embedding,
            })
        })
        .await
        .map_err(|e| Error::Database(format!("similarity search task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    fn chunk<'a>(content: &'a str, embedding: &'a [f32]) -> DocumentChunk<'a> {
        DocumentChunk {
            bot_id: "b1",
            organization_id: "org",
            user_id: None,
            document_id: 1,
            content,
            prev_chunk: None,
            next_chunk: None,
            embedding,
        }
    }

    fn query<'a>(whole: &'a [f32], narrow: &'a [f32]) -> SimilarityQuery<'a> {
        SimilarityQuery {
            organization_id: "org",
            bot_id: "b1",
            user_id: "u1",
            whole_embedding: whole,
            narrow_embedding: narrow,
        }
    }

    #[test]
    fn test_ranks_by_best_of_both_embeddings() {
        let repo = DocumentRepo::new(init_memory().unwrap());
        repo.insert(&chunk("x-axis", &[1.0, 0.0])).unwrap();
        repo.insert(&chunk("y-axis", &[0.0, 1.0])).unwrap();
        repo.insert(&chunk("diagonal", &[1.0, 1.0])).unwrap();

        let found = repo.similar(query(&[1.0, 0.0], &[0.0, 1.0])).unwrap();

        assert_eq!(found.len(), 3);
        assert!((found[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(found[2].content, "diagonal");
    }

    #[test]
    fn test_drops_low_similarity_and_caps_results() {
        let repo = DocumentRepo::new(init_memory().unwrap());
        repo.insert(&chunk("opposite", &[-1.0, 0.0])).unwrap();
        for i in 0..7 {
            repo.insert(&chunk(&format!("match {i}"), &[1.0, 0.0]))
                .unwrap();
        }

        let found = repo.similar(query(&[1.0, 0.0], &[1.0, 0.0])).unwrap();

        assert_eq!(found.len(), MAX_CHUNKS_PER_BOT);
        assert!(found.iter().all(|c| c.content.starts_with("match")));
    }

    #[tokio::test]
    async fn test_search_matches_similar() {
        let repo = DocumentRepo::new(init_memory().unwrap());
        repo.insert(&chunk("x-axis", &[1.0, 0.0])).unwrap();

        let found = repo.search(query(&[1.0, 0.0], &[1.0, 0.0])).await.unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "x-axis");
    }

    #[tokio::test]
    async fn test_blocked_search_can_time_out() {
        let pool = init_memory().unwrap();
        let repo = DocumentRepo::new(pool.clone());
        repo.insert(&chunk("x-axis", &[1.0, 0.0])).unwrap();

        // The pool has one connection; holding it stalls the scan
        let held = pool.get().unwrap();
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            repo.search(query(&[1.0, 0.0], &[1.0, 0.0])),
        )
        .await;
        drop(held);

        assert!(outcome.is_err());
    }

    #[test]
    fn test_private_documents_scoped_to_owner() {
        let repo = DocumentRepo::new(init_memory().unwrap());
        repo.insert(&DocumentChunk {
            user_id: Some("u2"),
            ..chunk("private", &[1.0, 0.0])
        })
        .unwrap();

        assert!(repo.similar(query(&[1.0, 0.0], &[1.0, 0.0])).unwrap().is_empty());
    }
}
