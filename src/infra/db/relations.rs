use std::collections::HashMap;

use async_trait::async_trait;

use crate::application::repos::{
    ArticleFilter, ArticleQuery, EntityStore, IdSet, RelationKind, RepoError, empty_relation_map,
};
use crate::domain::articles::{ArticleWrite, NewAuthor, WriteOutcome};
use crate::domain::entities::{
    ArticleRecord, AuthorRecord, CommentRecord, ContentTotals, TagRecord,
};

use super::types::{AuthorRow, CommentRow, RelationRow, TagRow};
use super::{PostgresRepositories, id_array, map_sqlx_error};

const TAG_LINKS_SQL: &str = "SELECT article_id AS primary_id, tag_id AS related_id \
    FROM article_tags WHERE article_id = ANY($1) ORDER BY article_id, tag_id";

const COMMENT_LINKS_SQL: &str = "SELECT article_id AS primary_id, id AS related_id \
    FROM comments WHERE article_id = ANY($1) ORDER BY article_id, created_at, id";

#[async_trait]
impl EntityStore for PostgresRepositories {
    async fn fetch_page(&self, query: &ArticleQuery) -> Result<Vec<ArticleRecord>, RepoError> {
        self.bounded(self.select_page(query)).await
    }

    async fn count_articles(&self, filter: &ArticleFilter) -> Result<u64, RepoError> {
        self.bounded(self.select_count(filter)).await
    }

    async fn fetch_articles(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, ArticleRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.bounded(self.select_articles(ids)).await
    }

    async fn fetch_authors(&self, ids: &IdSet) -> Result<HashMap<i64, AuthorRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .bounded(async {
                sqlx::query_as::<_, AuthorRow>(
                    "SELECT id, username, email, display_name, bio, created_at \
                     FROM authors WHERE id = ANY($1)",
                )
                .bind(id_array(ids))
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, AuthorRecord::from(row)))
            .collect())
    }

    async fn fetch_tags(&self, ids: &IdSet) -> Result<HashMap<i64, TagRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .bounded(async {
                sqlx::query_as::<_, TagRow>("SELECT id, name FROM tags WHERE id = ANY($1)")
                    .bind(id_array(ids))
                    .fetch_all(self.pool())
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, TagRecord::from(row)))
            .collect())
    }

    async fn fetch_comments(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, CommentRecord>, RepoError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = self
            .bounded(async {
                sqlx::query_as::<_, CommentRow>(
                    "SELECT id, article_id, author_id, content, created_at \
                     FROM comments WHERE id = ANY($1)",
                )
                .bind(id_array(ids))
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, CommentRecord::from(row)))
            .collect())
    }

    async fn fetch_relation_ids(
        &self,
        primary_ids: &IdSet,
        kind: RelationKind,
    ) -> Result<HashMap<i64, Vec<i64>>, RepoError> {
        let mut links = empty_relation_map(primary_ids);
        if primary_ids.is_empty() {
            return Ok(links);
        }

        let sql = match kind {
            RelationKind::Tags => TAG_LINKS_SQL,
            RelationKind::Comments => COMMENT_LINKS_SQL,
        };
        let rows = self
            .bounded(async {
                sqlx::query_as::<_, RelationRow>(sql)
                    .bind(id_array(primary_ids))
                    .fetch_all(self.pool())
                    .await
                    .map_err(map_sqlx_error)
            })
            .await?;

        for row in rows {
            links.entry(row.primary_id).or_default().push(row.related_id);
        }
        Ok(links)
    }

    async fn write(&self, op: &ArticleWrite) -> Result<WriteOutcome, RepoError> {
        self.bounded(self.apply_write(op)).await
    }

    async fn list_authors(&self) -> Result<Vec<AuthorRecord>, RepoError> {
        let rows = self
            .bounded(async {
                sqlx::query_as::<_, AuthorRow>(
                    "SELECT id, username, email, display_name, bio, created_at \
                     FROM authors ORDER BY created_at DESC, id DESC",
                )
                .fetch_all(self.pool())
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        Ok(rows.into_iter().map(AuthorRecord::from).collect())
    }

    async fn fetch_author_articles(
        &self,
        author_ids: &IdSet,
    ) -> Result<HashMap<i64, Vec<ArticleRecord>>, RepoError> {
        if author_ids.is_empty() {
            return Ok(HashMap::new());
        }
        self.bounded(self.select_author_articles(author_ids)).await
    }

    async fn create_author(&self, author: &NewAuthor) -> Result<AuthorRecord, RepoError> {
        let row = self
            .bounded(async {
                sqlx::query_as::<_, AuthorRow>(
                    r#"
                    INSERT INTO authors (username, email, display_name, bio)
                    VALUES ($1, $2, $3, $4)
                    RETURNING id, username, email, display_name, bio, created_at
                    "#,
                )
                .bind(&author.username)
                .bind(&author.email)
                .bind(author.display_name.as_deref())
                .bind(author.bio.as_deref())
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        Ok(AuthorRecord::from(row))
    }

    async fn totals(&self) -> Result<ContentTotals, RepoError> {
        let (articles, comments, authors): (i64, i64, i64) = self
            .bounded(async {
                sqlx::query_as(
                    "SELECT (SELECT COUNT(*) FROM articles), \
                            (SELECT COUNT(*) FROM comments), \
                            (SELECT COUNT(*) FROM authors)",
                )
                .fetch_one(self.pool())
                .await
                .map_err(map_sqlx_error)
            })
            .await?;

        Ok(ContentTotals {
            articles: Self::convert_count(articles)?,
            comments: Self::convert_count(comments)?,
            authors: Self::convert_count(authors)?,
        })
    }
}
