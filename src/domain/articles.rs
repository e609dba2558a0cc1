//! Write commands for articles and the input rules they must satisfy.

use super::error::DomainError;

pub const TITLE_MAX_CHARS: usize = 200;
pub const SUMMARY_MAX_CHARS: usize = 500;
pub const TAG_NAME_MAX_CHARS: usize = 50;
pub const USERNAME_MAX_CHARS: usize = 50;
pub const EMAIL_MAX_CHARS: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub author_id: i64,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub is_published: bool,
    pub tags: Vec<String>,
}

/// Partial update. `None` leaves a field untouched; `summary: Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticlePatch {
    pub title: Option<String>,
    pub content: Option<String>,
    pub summary: Option<Option<String>>,
    pub is_published: Option<bool>,
    pub tags: Option<Vec<String>>,
}

impl ArticlePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.summary.is_none()
            && self.is_published.is_none()
            && self.tags.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub author_id: i64,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAuthor {
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

/// A mutation of the article aggregate. Every variant names the article whose
/// cached representations become stale once it commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleWrite {
    Create(NewArticle),
    Update { id: i64, patch: ArticlePatch },
    Delete { id: i64 },
    Comment { article_id: i64, comment: NewComment },
}

impl ArticleWrite {
    pub fn kind(&self) -> WriteKind {
        match self {
            Self::Create(_) => WriteKind::Created,
            Self::Update { .. } => WriteKind::Updated,
            Self::Delete { .. } => WriteKind::Deleted,
            Self::Comment { .. } => WriteKind::Commented,
        }
    }

    /// The existing article this write touches; `None` for a create.
    pub fn target_id(&self) -> Option<i64> {
        match self {
            Self::Create(_) => None,
            Self::Update { id, .. } | Self::Delete { id } => Some(*id),
            Self::Comment { article_id, .. } => Some(*article_id),
        }
    }

    /// Check input rules and normalise tag names in place.
    pub fn validate(&mut self) -> Result<(), DomainError> {
        match self {
            Self::Create(article) => {
                validate_title(&article.title)?;
                validate_content(&article.content)?;
                validate_summary(article.summary.as_deref())?;
                article.tags = normalize_tags(&article.tags)?;
            }
            Self::Update { patch, .. } => {
                if patch.is_empty() {
                    return Err(DomainError::validation("patch", "no fields to update"));
                }
                if let Some(title) = patch.title.as_deref() {
                    validate_title(title)?;
                }
                if let Some(content) = patch.content.as_deref() {
                    validate_content(content)?;
                }
                if let Some(summary) = patch.summary.as_ref() {
                    validate_summary(summary.as_deref())?;
                }
                if let Some(tags) = patch.tags.as_ref() {
                    patch.tags = Some(normalize_tags(tags)?);
                }
            }
            Self::Delete { .. } => {}
            Self::Comment { comment, .. } => {
                if comment.content.trim().is_empty() {
                    return Err(DomainError::validation(
                        "comment.content",
                        "must not be empty",
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Created,
    Updated,
    Deleted,
    Commented,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Commented => "commented",
        }
    }
}

/// What a committed write touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    pub article_id: i64,
    pub kind: WriteKind,
}

impl NewAuthor {
    pub fn validate(&self) -> Result<(), DomainError> {
        let username = self.username.trim();
        if username.is_empty() {
            return Err(DomainError::validation("username", "must not be empty"));
        }
        if username.chars().count() > USERNAME_MAX_CHARS {
            return Err(DomainError::validation(
                "username",
                format!("must be at most {USERNAME_MAX_CHARS} characters"),
            ));
        }
        let email = self.email.trim();
        let email_len = email.chars().count();
        if !(3..=EMAIL_MAX_CHARS).contains(&email_len) || !email.contains('@') {
            return Err(DomainError::validation(
                "email",
                "must look like an address and be at most 255 characters",
            ));
        }
        Ok(())
    }
}

fn validate_title(title: &str) -> Result<(), DomainError> {
    if title.trim().is_empty() {
        return Err(DomainError::validation("title", "must not be empty"));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(DomainError::validation(
            "title",
            format!("must be at most {TITLE_MAX_CHARS} characters"),
        ));
    }
    Ok(())
}

fn validate_content(content: &str) -> Result<(), DomainError> {
    if content.trim().is_empty() {
        return Err(DomainError::validation("content", "must not be empty"));
    }
    Ok(())
}

fn validate_summary(summary: Option<&str>) -> Result<(), DomainError> {
    match summary {
        Some(text) if text.chars().count() > SUMMARY_MAX_CHARS => Err(DomainError::validation(
            "summary",
            format!("must be at most {SUMMARY_MAX_CHARS} characters"),
        )),
        _ => Ok(()),
    }
}

/// Trim and de-duplicate tag names, keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, DomainError> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for raw in tags {
        let name = raw.trim();
        if name.is_empty() {
            return Err(DomainError::validation("tags", "tag names must not be empty"));
        }
        if name.chars().count() > TAG_NAME_MAX_CHARS {
            return Err(DomainError::validation(
                "tags",
                format!("`{name}` exceeds {TAG_NAME_MAX_CHARS} characters"),
            ));
        }
        if !normalized.iter().any(|existing| existing == name) {
            normalized.push(name.to_string());
        }
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_article() -> NewArticle {
        NewArticle {
            author_id: 1,
            title: "Connection pooling".into(),
            content: "Pools amortise handshakes.".into(),
            summary: None,
            is_published: true,
            tags: vec![" redis ".into(), "postgresql".into(), "redis".into()],
        }
    }

    #[test]
    fn create_normalizes_tags() {
        let mut write = ArticleWrite::Create(new_article());
        write.validate().expect("valid article");
        let ArticleWrite::Create(article) = write else {
            panic!("variant changed");
        };
        assert_eq!(article.tags, vec!["redis", "postgresql"]);
    }

    #[test]
    fn create_rejects_long_title() {
        let mut article = new_article();
        article.title = "x".repeat(TITLE_MAX_CHARS + 1);
        let err = ArticleWrite::Create(article)
            .validate()
            .expect_err("title too long");
        assert_eq!(err.field(), Some("title"));
    }

    #[test]
    fn create_rejects_long_summary() {
        let mut article = new_article();
        article.summary = Some("s".repeat(SUMMARY_MAX_CHARS + 1));
        let err = ArticleWrite::Create(article)
            .validate()
            .expect_err("summary too long");
        assert_eq!(err.field(), Some("summary"));
    }

    #[test]
    fn create_rejects_blank_tag() {
        let mut article = new_article();
        article.tags.push("  ".into());
        let err = ArticleWrite::Create(article)
            .validate()
            .expect_err("blank tag");
        assert_eq!(err.field(), Some("tags"));
    }

    #[test]
    fn empty_patch_is_rejected() {
        let mut write = ArticleWrite::Update {
            id: 3,
            patch: ArticlePatch::default(),
        };
        assert!(write.validate().is_err());
    }

    #[test]
    fn patch_can_clear_summary() {
        let mut write = ArticleWrite::Update {
            id: 3,
            patch: ArticlePatch {
                summary: Some(None),
                ..ArticlePatch::default()
            },
        };
        write.validate().expect("clearing summary is allowed");
    }

    #[test]
    fn blank_comment_is_rejected() {
        let mut write = ArticleWrite::Comment {
            article_id: 1,
            comment: NewComment {
                author_id: 2,
                content: "   ".into(),
            },
        };
        let err = write.validate().expect_err("blank comment");
        assert_eq!(err.field(), Some("comment.content"));
    }

    #[test]
    fn author_requires_plausible_email() {
        let author = NewAuthor {
            username: "ada".into(),
            email: "nope".into(),
            display_name: None,
            bio: None,
        };
        assert_eq!(author.validate().expect_err("bad email").field(), Some("email"));
    }
}
