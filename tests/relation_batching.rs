mod common;

use common::Fixture;
use pressroom::application::diagnostics::CacheOutcome;
use pressroom::application::pagination::PageWindow;
use pressroom::application::repos::{ArticleFilter, ArticleQuery, RelationKind};
use pressroom::infra::memory::StoreOp;

const LIST_QUERIES: u32 = 7;
const DETAIL_QUERIES: u32 = 6;
const AUTHOR_QUERIES: u32 = 2;

fn page_of(limit: u32) -> ArticleQuery {
    ArticleQuery {
        filter: ArticleFilter::published(),
        window: PageWindow::new(0, limit, 100),
        ..ArticleQuery::default()
    }
}

async fn populate(fx: &Fixture, articles: usize) -> Vec<i64> {
    let authors = [fx.author("ada").await, fx.author("bob").await, fx.author("cy").await];
    let tags = ["rust", "postgresql", "redis", "caching"];
    let mut ids = Vec::with_capacity(articles);
    for index in 0..articles {
        let author = authors[index % authors.len()];
        let id = fx
            .article(
                author,
                &format!("Article {index}"),
                &[tags[index % tags.len()], tags[(index + 1) % tags.len()]],
            )
            .await;
        let commenter = authors[(index + 1) % authors.len()];
        fx.comment(id, commenter, "nice").await;
        ids.push(id);
    }
    ids
}

#[tokio::test]
async fn list_query_count_does_not_grow_with_page_size() {
    for size in [1_u32, 20, 60] {
        let fx = Fixture::new();
        populate(&fx, size as usize).await;
        fx.store.take_calls();

        let loaded = fx.service.read_list(&page_of(size)).await.expect("list");
        assert_eq!(loaded.value.items.len(), size as usize);
        assert_eq!(loaded.stats.cache, CacheOutcome::Miss);
        assert_eq!(
            loaded.stats.store_queries, LIST_QUERIES,
            "page of {size} articles"
        );
        assert_eq!(fx.store.take_calls().len(), LIST_QUERIES as usize);
    }
}

#[tokio::test]
async fn detail_read_uses_a_fixed_number_of_queries() {
    let fx = Fixture::new();
    let ids = populate(&fx, 3).await;
    fx.store.take_calls();

    let loaded = fx.service.read_one(ids[1]).await.expect("detail");
    assert_eq!(loaded.stats.store_queries, DETAIL_QUERIES);
    assert_eq!(loaded.value.tags.len(), 2);
    assert_eq!(loaded.value.comments.len(), 1);
}

#[tokio::test]
async fn shared_author_is_fetched_once() {
    let fx = Fixture::new();
    let ada = fx.author("ada").await;
    for index in 0..20 {
        fx.article(ada, &format!("Solo {index}"), &["rust"]).await;
    }
    fx.store.take_calls();

    let loaded = fx.service.read_list(&page_of(20)).await.expect("list");
    assert_eq!(loaded.value.items.len(), 20);
    assert!(loaded.value.items.iter().all(|item| item.author.id == ada));

    let author_calls = fx.store.calls_of(StoreOp::FetchAuthors);
    assert_eq!(author_calls.len(), 1);
    assert_eq!(author_calls[0].ids, 1);

    let tag_calls = fx.store.calls_of(StoreOp::FetchTags);
    assert_eq!(tag_calls.len(), 1);
    assert_eq!(tag_calls[0].ids, 1);
}

#[tokio::test]
async fn relation_lookups_cover_the_whole_page_at_once() {
    let fx = Fixture::new();
    populate(&fx, 12).await;
    fx.store.take_calls();

    fx.service.read_list(&page_of(12)).await.expect("list");

    for kind in [RelationKind::Tags, RelationKind::Comments] {
        let calls = fx.store.calls_of(StoreOp::RelationIds(kind));
        assert_eq!(calls.len(), 1, "{}", kind.as_str());
        assert_eq!(calls[0].ids, 12);
    }
}

#[tokio::test]
async fn empty_page_skips_relation_queries() {
    let fx = Fixture::new();
    fx.store.take_calls();

    let loaded = fx.service.read_list(&page_of(20)).await.expect("list");
    assert!(loaded.value.items.is_empty());
    assert_eq!(loaded.value.total, 0);
    assert_eq!(loaded.stats.store_queries, 2);

    let ops: Vec<StoreOp> = fx.store.take_calls().into_iter().map(|call| call.op).collect();
    assert!(ops.contains(&StoreOp::CountArticles));
    assert!(ops.contains(&StoreOp::FetchPage));
    assert_eq!(ops.len(), 2);
}

#[tokio::test]
async fn articles_without_relations_skip_row_fetches() {
    let fx = Fixture::new();
    let ada = fx.author("ada").await;
    fx.article(ada, "Bare", &[]).await;
    fx.store.take_calls();

    let loaded = fx.service.read_list(&page_of(5)).await.expect("list");
    let item = &loaded.value.items[0];
    assert!(item.tags.is_empty());
    assert!(item.comments.is_empty());
    assert!(item.commenters.is_empty());
    // count, page, two relation lookups, authors
    assert_eq!(loaded.stats.store_queries, 5);
    assert!(fx.store.calls_of(StoreOp::FetchTags).is_empty());
    assert!(fx.store.calls_of(StoreOp::FetchComments).is_empty());
}

#[tokio::test]
async fn hydrated_entities_share_tag_identity() {
    let fx = Fixture::new();
    let ada = fx.author("ada").await;
    fx.article(ada, "One", &["rust", "redis"]).await;
    fx.article(ada, "Two", &["redis"]).await;

    let loaded = fx.service.read_list(&page_of(10)).await.expect("list");
    let redis_ids: Vec<i64> = loaded
        .value
        .items
        .iter()
        .flat_map(|item| item.tags.iter())
        .filter(|tag| tag.name == "redis")
        .map(|tag| tag.id)
        .collect();
    assert_eq!(redis_ids.len(), 2);
    assert_eq!(redis_ids[0], redis_ids[1]);

    for item in &loaded.value.items {
        let mut ids: Vec<i64> = item.tags.iter().map(|tag| tag.id).collect();
        let before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), before);
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }
}

#[tokio::test]
async fn author_read_cost_does_not_grow_with_article_count() {
    for count in [0_usize, 5, 40] {
        let fx = Fixture::new();
        let ada = fx.author("ada").await;
        for index in 0..count {
            fx.article(ada, &format!("Entry {index}"), &["rust"]).await;
        }
        fx.store.take_calls();

        let loaded = fx.service.read_author(ada).await.expect("author");
        assert_eq!(loaded.value.articles.len(), count);
        assert_eq!(
            loaded.stats.store_queries, AUTHOR_QUERIES,
            "author with {count} articles"
        );

        let article_calls = fx.store.calls_of(StoreOp::AuthorArticles);
        assert_eq!(article_calls.len(), 1);
        assert_eq!(article_calls[0].ids, 1);
        assert_eq!(fx.store.take_calls().len(), AUTHOR_QUERIES as usize);
    }
}
