//! Demo dataset generation.
//!
//! Everything is written through [`ArticleService`], so slugs, tag resolution
//! and cache invalidation follow the same path as any other write. The
//! generator is seeded, so two runs with the same plan produce the same data.

use std::time::Instant;

use tracing::info;

use crate::application::articles::ArticleService;
use crate::application::error::AppError;
use crate::domain::articles::{ArticleWrite, NewArticle, NewAuthor, NewComment};

pub const SEED_TAGS: [&str; 16] = [
    "python",
    "fastapi",
    "postgresql",
    "redis",
    "docker",
    "kubernetes",
    "react",
    "typescript",
    "aws",
    "devops",
    "testing",
    "performance",
    "security",
    "microservices",
    "graphql",
    "rest-api",
];

const DEFAULT_RNG_SEED: u64 = 0x5eed_2024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedPlan {
    pub authors: usize,
    pub articles: usize,
    pub max_comments_per_article: usize,
    pub rng_seed: u64,
}

impl SeedPlan {
    pub fn small() -> Self {
        Self {
            authors: 10,
            articles: 100,
            max_comments_per_article: 2,
            rng_seed: DEFAULT_RNG_SEED,
        }
    }

    pub fn full() -> Self {
        Self {
            authors: 50,
            articles: 10_000,
            max_comments_per_article: 5,
            rng_seed: DEFAULT_RNG_SEED,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub authors: usize,
    pub articles: usize,
    pub comments: usize,
}

pub async fn seed(service: &ArticleService, plan: SeedPlan) -> Result<SeedReport, AppError> {
    if plan.authors == 0 {
        return Err(AppError::validation("seed plan needs at least one author"));
    }

    let started = Instant::now();
    let mut rng = fastrand::Rng::with_seed(plan.rng_seed);
    let mut report = SeedReport::default();

    let mut author_ids = Vec::with_capacity(plan.authors);
    for index in 0..plan.authors {
        let author = service
            .create_author(NewAuthor {
                username: format!("user_{index:04}"),
                email: format!("user_{index:04}@example.com"),
                display_name: Some(format!("User {index}")),
                bio: Some(format!(
                    "I am test user number {index}. I write about technology."
                )),
            })
            .await?;
        author_ids.push(author.id);
    }
    report.authors = author_ids.len();
    info!(authors = report.authors, "seeded authors");

    for index in 0..plan.articles {
        let topic = pick(&mut rng, &SEED_TAGS);
        let tag_count = rng.usize(1..=4);
        let tags = rng
            .choose_multiple(SEED_TAGS.iter(), tag_count)
            .into_iter()
            .map(|tag| (*tag).to_string())
            .collect();

        let receipt = service
            .write(ArticleWrite::Create(NewArticle {
                author_id: *pick(&mut rng, &author_ids),
                title: format!("Article {index}: How to optimize {topic} applications"),
                content: format!("This is the full content of article {index}. ").repeat(20),
                summary: Some(format!(
                    "A guide to optimizing {} applications for production.",
                    pick(&mut rng, &SEED_TAGS)
                )),
                is_published: rng.f32() > 0.1,
                tags,
            }))
            .await?;
        report.articles += 1;

        let comment_count = if plan.max_comments_per_article == 0 {
            0
        } else {
            rng.usize(1..=plan.max_comments_per_article)
        };
        for _ in 0..comment_count {
            let author_id = *pick(&mut rng, &author_ids);
            service
                .write(ArticleWrite::Comment {
                    article_id: receipt.outcome.article_id,
                    comment: NewComment {
                        author_id,
                        content: format!(
                            "Great article! Very helpful for understanding the topic. Comment by user {author_id}."
                        ),
                    },
                })
                .await?;
            report.comments += 1;
        }

        if (index + 1) % 500 == 0 {
            info!(articles = index + 1, "seeding articles");
        }
    }

    info!(
        authors = report.authors,
        articles = report.articles,
        comments = report.comments,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "seeding complete"
    );
    Ok(report)
}

fn pick<'a, T>(rng: &mut fastrand::Rng, items: &'a [T]) -> &'a T {
    &items[rng.usize(..items.len())]
}
