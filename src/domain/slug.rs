//! URL slugs for articles.
//!
//! Slugs are derived from titles with the `slug` crate. Uniqueness is decided by
//! the caller through a predicate so the derivation stays pure; stores pass in
//! the set of slugs already taken by the same family (`base`, `base-2`, ...).

use std::collections::HashSet;

use slug::slugify;
use thiserror::Error;
use time::OffsetDateTime;

const MAX_SUFFIX_ATTEMPTS: usize = 64;
const MAX_BASE_LEN: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("exhausted attempts to find a unique slug for `{base}`")]
    Exhausted { base: String },
}

/// Derive a base slug from the provided title.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let mut candidate = slugify(input);
    if candidate.len() > MAX_BASE_LEN {
        candidate.truncate(MAX_BASE_LEN);
        while candidate.ends_with('-') {
            candidate.pop();
        }
    }

    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Produce a slug that does not collide according to the supplied predicate.
///
/// `is_unique` returns `true` when the candidate is free. Collisions are resolved
/// by suffixing a counter starting at `-2`. Once the counter runs out the
/// current Unix timestamp is used as the suffix instead (`base-<ts>`,
/// `base-<ts>-2`, ...).
pub fn generate_unique_slug<F>(input: &str, is_unique: F) -> Result<String, SlugError>
where
    F: FnMut(&str) -> bool,
{
    generate_unique_slug_at(input, OffsetDateTime::now_utc().unix_timestamp(), is_unique)
}

fn generate_unique_slug_at<F>(input: &str, stamp: i64, mut is_unique: F) -> Result<String, SlugError>
where
    F: FnMut(&str) -> bool,
{
    let base = derive_slug(input)?;

    if is_unique(&base) {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{base}-{attempt}");
        if is_unique(&candidate) {
            return Ok(candidate);
        }
    }

    let stamped = format!("{base}-{stamp}");
    if is_unique(&stamped) {
        return Ok(stamped);
    }
    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let candidate = format!("{stamped}-{attempt}");
        if is_unique(&candidate) {
            return Ok(candidate);
        }
    }

    Err(SlugError::Exhausted { base })
}

/// Pick a slug for `title` that is not in `taken`.
pub fn unique_slug_among(title: &str, taken: &HashSet<String>) -> Result<String, SlugError> {
    generate_unique_slug(title, |candidate| !taken.contains(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_slug_lowercases_and_dashes() {
        let slug = derive_slug("Tuning PostgreSQL: Indexes & Plans").expect("slug");
        assert_eq!(slug, "tuning-postgresql-indexes-plans");
    }

    #[test]
    fn derive_slug_rejects_blank_titles() {
        assert_eq!(derive_slug("   "), Err(SlugError::EmptyInput));
    }

    #[test]
    fn derive_slug_rejects_symbol_only_titles() {
        assert!(matches!(
            derive_slug("!!!"),
            Err(SlugError::Unrepresentable { .. })
        ));
    }

    #[test]
    fn derive_slug_caps_length_without_trailing_dash() {
        let title = "ab ".repeat(150);
        let slug = derive_slug(&title).expect("slug");
        assert!(slug.len() <= MAX_BASE_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn unique_slug_among_appends_counter() {
        let taken: HashSet<String> = ["redis-notes", "redis-notes-2"]
            .into_iter()
            .map(String::from)
            .collect();

        let slug = unique_slug_among("Redis Notes", &taken).expect("unique slug");
        assert_eq!(slug, "redis-notes-3");
    }

    #[test]
    fn timestamp_suffix_takes_over_when_counter_runs_out() {
        let mut taken: HashSet<String> = HashSet::from(["example".to_string()]);
        taken.extend((2..=MAX_SUFFIX_ATTEMPTS + 1).map(|n| format!("example-{n}")));

        let slug = generate_unique_slug_at("Example", 1_717_200_000, |candidate| {
            !taken.contains(candidate)
        })
        .expect("stamped slug");
        assert_eq!(slug, "example-1717200000");

        taken.insert(slug);
        let slug = generate_unique_slug_at("Example", 1_717_200_000, |candidate| {
            !taken.contains(candidate)
        })
        .expect("second stamped slug");
        assert_eq!(slug, "example-1717200000-2");
    }

    #[test]
    fn generate_unique_slug_exhausted() {
        let result =
            generate_unique_slug("Example", |_| false).expect_err("should exhaust attempts");
        assert_eq!(
            result,
            SlugError::Exhausted {
                base: "example".to_string()
            }
        );
    }
}
