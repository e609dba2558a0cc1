//! Batched hydration of articles.
//!
//! A page of articles is hydrated with a fixed number of set-oriented queries,
//! whatever the page size:
//!
//! 1. tag ids and comment ids per article (two queries, run together)
//! 2. tag rows and comment rows for the distinct ids (two queries, run together)
//! 3. author rows for article authors and comment authors combined (one query)
//!
//! Each related id is fetched once per pass no matter how many articles share it.

use std::collections::HashMap;
use std::time::Instant;

use metrics::histogram;
use tracing::debug;

use crate::application::repos::{ArticleQuery, EntityStore, IdSet, RelationKind, RepoError};
use crate::domain::entities::{
    ArticlePage, ArticleRecord, ArticleSummary, AuthorDetail, AuthorRecord, CommentRecord,
    HydratedArticle, TagRecord,
};

const SOURCE: &str = "application::loader";

/// Load one page of articles, hydrated, together with the filter's total count.
pub async fn load_page(
    store: &dyn EntityStore,
    query: &ArticleQuery,
) -> Result<ArticlePage, RepoError> {
    let started = Instant::now();
    let (total, rows) = tokio::try_join!(
        store.count_articles(&query.filter),
        store.fetch_page(query)
    )?;
    let items = hydrate(store, rows).await?;
    histogram!("pressroom_load_ms", "read" => "list").record(elapsed_ms(started));

    Ok(ArticlePage {
        items,
        total,
        offset: query.window.offset(),
        limit: query.window.limit(),
    })
}

/// Load one article, hydrated. `None` when the id does not exist.
pub async fn load_one(
    store: &dyn EntityStore,
    id: i64,
) -> Result<Option<HydratedArticle>, RepoError> {
    let started = Instant::now();
    let ids = IdSet::from([id]);
    let Some(article) = store.fetch_articles(&ids).await?.remove(&id) else {
        return Ok(None);
    };
    let hydrated = hydrate(store, vec![article]).await?.pop();
    histogram!("pressroom_load_ms", "read" => "detail").record(elapsed_ms(started));
    Ok(hydrated)
}

/// Load one author with summaries of their articles: the author row and the
/// article rows, two queries run together however many articles there are.
/// `None` when the author does not exist.
pub async fn load_author(
    store: &dyn EntityStore,
    id: i64,
) -> Result<Option<AuthorDetail>, RepoError> {
    let started = Instant::now();
    let ids = IdSet::from([id]);
    let (mut authors, mut articles) = tokio::try_join!(
        store.fetch_authors(&ids),
        store.fetch_author_articles(&ids)
    )?;
    let Some(author) = authors.remove(&id) else {
        return Ok(None);
    };
    let articles = articles
        .remove(&id)
        .unwrap_or_default()
        .into_iter()
        .map(ArticleSummary::from)
        .collect();
    histogram!("pressroom_load_ms", "read" => "author").record(elapsed_ms(started));
    Ok(Some(AuthorDetail { author, articles }))
}

/// Resolve tags, comments and authors for `articles`, preserving their order.
pub async fn hydrate(
    store: &dyn EntityStore,
    articles: Vec<ArticleRecord>,
) -> Result<Vec<HydratedArticle>, RepoError> {
    if articles.is_empty() {
        return Ok(Vec::new());
    }

    let primary_ids: IdSet = articles.iter().map(|article| article.id).collect();
    let (tag_links, comment_links) = tokio::try_join!(
        store.fetch_relation_ids(&primary_ids, RelationKind::Tags),
        store.fetch_relation_ids(&primary_ids, RelationKind::Comments)
    )?;

    let tag_ids = distinct_related(&tag_links);
    let comment_ids = distinct_related(&comment_links);
    let (tags, comments) = tokio::try_join!(
        store.fetch_tags(&tag_ids),
        store.fetch_comments(&comment_ids)
    )?;

    let author_ids: IdSet = articles
        .iter()
        .map(|article| article.author_id)
        .chain(comments.values().map(|comment| comment.author_id))
        .collect();
    let authors = store.fetch_authors(&author_ids).await?;

    debug!(
        target: SOURCE,
        articles = articles.len(),
        tags = tags.len(),
        comments = comments.len(),
        authors = authors.len(),
        "hydrated article batch"
    );

    articles
        .into_iter()
        .map(|article| assemble(article, &tag_links, &comment_links, &tags, &comments, &authors))
        .collect()
}

fn distinct_related(links: &HashMap<i64, Vec<i64>>) -> IdSet {
    links.values().flatten().copied().collect()
}

fn assemble(
    article: ArticleRecord,
    tag_links: &HashMap<i64, Vec<i64>>,
    comment_links: &HashMap<i64, Vec<i64>>,
    tags: &HashMap<i64, TagRecord>,
    comments: &HashMap<i64, CommentRecord>,
    authors: &HashMap<i64, AuthorRecord>,
) -> Result<HydratedArticle, RepoError> {
    let author = authors
        .get(&article.author_id)
        .cloned()
        .ok_or_else(|| RepoError::Integrity {
            message: format!(
                "article {} references missing author {}",
                article.id, article.author_id
            ),
        })?;

    // Rows deleted between the link query and the row query are skipped.
    let article_tags: Vec<TagRecord> = linked(tag_links, article.id)
        .iter()
        .filter_map(|id| tags.get(id).cloned())
        .collect();
    let article_comments: Vec<CommentRecord> = linked(comment_links, article.id)
        .iter()
        .filter_map(|id| comments.get(id).cloned())
        .collect();

    let commenter_ids: IdSet = article_comments
        .iter()
        .map(|comment| comment.author_id)
        .collect();
    let commenters = commenter_ids
        .iter()
        .filter_map(|id| authors.get(id).cloned())
        .collect();

    Ok(HydratedArticle {
        article,
        author,
        tags: article_tags,
        comments: article_comments,
        commenters,
    })
}

fn linked(links: &HashMap<i64, Vec<i64>>, article_id: i64) -> &[i64] {
    links.get(&article_id).map(Vec::as_slice).unwrap_or_default()
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1_000.0
}
