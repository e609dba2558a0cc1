use time::OffsetDateTime;

use crate::domain::entities::{ArticleRecord, AuthorRecord, CommentRecord, TagRecord};

pub(super) const ARTICLE_COLUMNS: &str = "a.id, a.author_id, a.title, a.slug, a.content, \
    a.summary, a.view_count, a.is_published, a.published_at, a.created_at, a.updated_at";

#[derive(sqlx::FromRow)]
pub(super) struct ArticleRow {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
    pub summary: Option<String>,
    pub view_count: i64,
    pub is_published: bool,
    pub published_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<ArticleRow> for ArticleRecord {
    fn from(row: ArticleRow) -> Self {
        Self {
            id: row.id,
            author_id: row.author_id,
            title: row.title,
            slug: row.slug,
            content: row.content,
            summary: row.summary,
            view_count: row.view_count,
            is_published: row.is_published,
            published_at: row.published_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct AuthorRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub created_at: OffsetDateTime,
}

impl From<AuthorRow> for AuthorRecord {
    fn from(row: AuthorRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            display_name: row.display_name,
            bio: row.bio,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct TagRow {
    pub id: i64,
    pub name: String,
}

impl From<TagRow> for TagRecord {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(super) struct CommentRow {
    pub id: i64,
    pub article_id: i64,
    pub author_id: i64,
    pub content: String,
    pub created_at: OffsetDateTime,
}

impl From<CommentRow> for CommentRecord {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            article_id: row.article_id,
            author_id: row.author_id,
            content: row.content,
            created_at: row.created_at,
        }
    }
}

/// One edge of a one-to-many relation: `(primary id, related id)`.
#[derive(sqlx::FromRow)]
pub(super) struct RelationRow {
    pub primary_id: i64,
    pub related_id: i64,
}
