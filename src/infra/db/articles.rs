use std::collections::{HashMap, HashSet};

use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::debug;

use crate::application::repos::{ArticleFilter, ArticleQuery, IdSet, RepoError, SortField};
use crate::domain::articles::{ArticlePatch, ArticleWrite, NewArticle, NewComment, WriteOutcome};
use crate::domain::entities::ArticleRecord;
use crate::domain::slug::{SlugError, derive_slug, unique_slug_among};

use super::types::{ARTICLE_COLUMNS, ArticleRow};
use super::{PostgresRepositories, id_array, map_sqlx_error};

const SOURCE: &str = "infra::db::articles";

impl PostgresRepositories {
    fn apply_filter<'q>(qb: &mut QueryBuilder<'q, Postgres>, filter: &ArticleFilter) {
        qb.push(" WHERE TRUE");

        if let Some(published) = filter.published {
            qb.push(" AND a.is_published = ");
            qb.push_bind(published);
        }

        if let Some(author_id) = filter.author_id {
            qb.push(" AND a.author_id = ");
            qb.push_bind(author_id);
        }

        if let Some(tag) = filter.tag.as_ref() {
            qb.push(
                " AND EXISTS (SELECT 1 FROM article_tags at INNER JOIN tags t ON t.id = at.tag_id WHERE at.article_id = a.id AND t.name = ",
            );
            qb.push_bind(tag.clone());
            qb.push(")");
        }
    }

    fn sort_column(field: SortField) -> &'static str {
        match field {
            SortField::CreatedAt => "a.created_at",
            SortField::PublishedAt => "a.published_at",
            SortField::ViewCount => "a.view_count",
            SortField::Title => "a.title",
        }
    }

    pub(super) async fn select_page(
        &self,
        query: &ArticleQuery,
    ) -> Result<Vec<ArticleRecord>, RepoError> {
        let offset = i64::try_from(query.window.offset()).map_err(|_| RepoError::InvalidInput {
            message: "offset exceeds supported range".to_string(),
        })?;
        let direction = query.sort.direction.as_str().to_ascii_uppercase();

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a"
        ));
        Self::apply_filter(&mut qb, &query.filter);
        qb.push(format!(
            " ORDER BY {column} {direction} NULLS LAST, a.id {direction}",
            column = Self::sort_column(query.sort.field),
        ));
        qb.push(" LIMIT ");
        qb.push_bind(i64::from(query.window.limit()));
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb
            .build_query_as::<ArticleRow>()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ArticleRecord::from).collect())
    }

    pub(super) async fn select_count(&self, filter: &ArticleFilter) -> Result<u64, RepoError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM articles a");
        Self::apply_filter(&mut qb, filter);

        let count: i64 = qb
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Self::convert_count(count)
    }

    pub(super) async fn select_articles(
        &self,
        ids: &IdSet,
    ) -> Result<HashMap<i64, ArticleRecord>, RepoError> {
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.id = ANY($1)"
        ))
        .bind(id_array(ids))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.id, ArticleRecord::from(row)))
            .collect())
    }

    /// Every article of the given authors, newest first per author.
    pub(super) async fn select_author_articles(
        &self,
        author_ids: &IdSet,
    ) -> Result<HashMap<i64, Vec<ArticleRecord>>, RepoError> {
        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles a WHERE a.author_id = ANY($1) \
             ORDER BY a.author_id, a.created_at DESC, a.id DESC"
        ))
        .bind(id_array(author_ids))
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let mut by_author: HashMap<i64, Vec<ArticleRecord>> =
            author_ids.iter().map(|id| (*id, Vec::new())).collect();
        for row in rows {
            let article = ArticleRecord::from(row);
            by_author
                .entry(article.author_id)
                .or_default()
                .push(article);
        }
        Ok(by_author)
    }

    /// Apply one write inside a single transaction.
    pub(super) async fn apply_write(&self, op: &ArticleWrite) -> Result<WriteOutcome, RepoError> {
        let mut tx = self.begin().await?;
        // Let the server abandon a slow write before the client deadline can
        // drop the future mid-commit.
        sqlx::query(&format!(
            "SET LOCAL statement_timeout = {}",
            self.statement_timeout_ms()
        ))
        .execute(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

        let article_id = match op {
            ArticleWrite::Create(article) => insert_article(&mut tx, article).await?,
            ArticleWrite::Update { id, patch } => {
                update_article(&mut tx, *id, patch).await?;
                *id
            }
            ArticleWrite::Delete { id } => {
                delete_article(&mut tx, *id).await?;
                *id
            }
            ArticleWrite::Comment {
                article_id,
                comment,
            } => {
                insert_comment(&mut tx, *article_id, comment).await?;
                *article_id
            }
        };

        tx.commit().await.map_err(map_sqlx_error)?;

        let kind = op.kind();
        debug!(target: SOURCE, article_id, kind = kind.as_str(), "write committed");
        Ok(WriteOutcome { article_id, kind })
    }
}

async fn insert_article(
    tx: &mut Transaction<'_, Postgres>,
    article: &NewArticle,
) -> Result<i64, RepoError> {
    ensure_author(tx, article.author_id).await?;
    let slug = next_free_slug(tx, &article.title, None).await?;

    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO articles (author_id, title, slug, content, summary, is_published, published_at)
        VALUES ($1, $2, $3, $4, $5, $6, CASE WHEN $6 THEN now() END)
        RETURNING id
        "#,
    )
    .bind(article.author_id)
    .bind(&article.title)
    .bind(&slug)
    .bind(&article.content)
    .bind(article.summary.as_deref())
    .bind(article.is_published)
    .fetch_one(tx.as_mut())
    .await
    .map_err(map_sqlx_error)?;

    replace_tags(tx, id, &article.tags).await?;
    Ok(id)
}

async fn update_article(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    patch: &ArticlePatch,
) -> Result<(), RepoError> {
    let current: Option<(String, String)> =
        sqlx::query_as("SELECT title, slug FROM articles WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(tx.as_mut())
            .await
            .map_err(map_sqlx_error)?;
    let Some((current_title, current_slug)) = current else {
        return Err(RepoError::NotFound);
    };

    let slug = match patch.title.as_deref() {
        Some(title) if title != current_title => {
            Some(next_free_slug(tx, title, Some(&current_slug)).await?)
        }
        _ => None,
    };

    sqlx::query(
        r#"
        UPDATE articles SET
            title = COALESCE($2, title),
            slug = COALESCE($3, slug),
            content = COALESCE($4, content),
            summary = CASE WHEN $5 THEN $6 ELSE summary END,
            is_published = COALESCE($7, is_published),
            published_at = CASE
                WHEN COALESCE($7, is_published) AND published_at IS NULL THEN now()
                ELSE published_at
            END,
            updated_at = GREATEST(now(), updated_at)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(patch.title.as_deref())
    .bind(slug.as_deref())
    .bind(patch.content.as_deref())
    .bind(patch.summary.is_some())
    .bind(patch.summary.clone().flatten())
    .bind(patch.is_published)
    .execute(tx.as_mut())
    .await
    .map_err(map_sqlx_error)?;

    if let Some(tags) = patch.tags.as_ref() {
        replace_tags(tx, id, tags).await?;
    }
    Ok(())
}

async fn delete_article(tx: &mut Transaction<'_, Postgres>, id: i64) -> Result<(), RepoError> {
    // Comments and tag links cascade.
    let result = sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(id)
        .execute(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(RepoError::NotFound);
    }
    Ok(())
}

async fn insert_comment(
    tx: &mut Transaction<'_, Postgres>,
    article_id: i64,
    comment: &NewComment,
) -> Result<(), RepoError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM articles WHERE id = $1 FOR SHARE")
        .bind(article_id)
        .fetch_optional(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;
    if exists.is_none() {
        return Err(RepoError::NotFound);
    }
    ensure_author(tx, comment.author_id).await?;

    sqlx::query("INSERT INTO comments (article_id, author_id, content) VALUES ($1, $2, $3)")
        .bind(article_id)
        .bind(comment.author_id)
        .bind(&comment.content)
        .execute(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn ensure_author(tx: &mut Transaction<'_, Postgres>, author_id: i64) -> Result<(), RepoError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM authors WHERE id = $1)")
        .bind(author_id)
        .fetch_one(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

    if exists {
        Ok(())
    } else {
        Err(RepoError::InvalidInput {
            message: format!("author {author_id} does not exist"),
        })
    }
}

/// Pick a slug for `title` that no other article holds. `own` is the slug the
/// article already has, which it may keep.
async fn next_free_slug(
    tx: &mut Transaction<'_, Postgres>,
    title: &str,
    own: Option<&str>,
) -> Result<String, RepoError> {
    let base = derive_slug(title).map_err(slug_error)?;
    let taken: Vec<String> =
        sqlx::query_scalar("SELECT slug FROM articles WHERE slug = $1 OR slug LIKE $1 || '-%'")
            .bind(&base)
            .fetch_all(tx.as_mut())
            .await
            .map_err(map_sqlx_error)?;

    let taken: HashSet<String> = taken
        .into_iter()
        .filter(|slug| Some(slug.as_str()) != own)
        .collect();
    unique_slug_among(title, &taken).map_err(slug_error)
}

async fn replace_tags(
    tx: &mut Transaction<'_, Postgres>,
    article_id: i64,
    names: &[String],
) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM article_tags WHERE article_id = $1")
        .bind(article_id)
        .execute(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

    if names.is_empty() {
        return Ok(());
    }

    sqlx::query("INSERT INTO tags (name) SELECT UNNEST($1::text[]) ON CONFLICT (name) DO NOTHING")
        .bind(names)
        .execute(tx.as_mut())
        .await
        .map_err(map_sqlx_error)?;

    sqlx::query(
        r#"
        INSERT INTO article_tags (article_id, tag_id)
        SELECT $1, t.id FROM tags t WHERE t.name = ANY($2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(article_id)
    .bind(names)
    .execute(tx.as_mut())
    .await
    .map_err(map_sqlx_error)?;
    Ok(())
}

fn slug_error(err: SlugError) -> RepoError {
    RepoError::InvalidInput {
        message: err.to_string(),
    }
}
