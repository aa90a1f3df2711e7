//! Persisted entity structs.

use serde::{Deserialize, Serialize};

/// Profile picture every account starts with. Never deleted from disk.
pub const DEFAULT_PROFILE_PIC: &str = "default.png";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub profile_pic: String,
    /// Argon2 PHC string; never serialized out.
    #[serde(skip_serializing, default)]
    pub password: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Post {
    pub id: i64,
    pub title: String,
    pub content: String,
    /// Unix millis.
    pub date_posted: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: i64,
    pub content: String,
    pub date_posted: i64,
    pub user_id: i64,
    pub post_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: i64,
    pub content: String,
    pub post_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub authors: String,
    pub edition: String,
    pub link: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct NewBook {
    pub title: String,
    pub authors: String,
    pub edition: String,
    pub link: Option<String>,
    pub description: String,
}

/// A post together with what the post page shows next to it.
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    pub post: Post,
    pub author: String,
    pub comments: Vec<Comment>,
    pub tags: Vec<Tag>,
}

/// A tag label and the posts carrying it.
#[derive(Debug, Clone, Serialize)]
pub struct TagGroup {
    pub tag: String,
    pub posts: Vec<Post>,
}

/// One page of an ordered listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.page
            .checked_mul(self.per_page)
            .is_some_and(|seen| seen < self.total)
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn pages(&self) -> usize {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page)
    }
}

/// Clamp a 1-based page number and page size into a SQL `(limit, offset)`.
///
/// An offset past `i64::MAX` saturates, which selects no rows.
pub fn limit_offset(page: usize, per_page: usize) -> (i64, i64) {
    let page = page.max(1);
    let per_page = per_page.max(1);
    let offset = (page - 1)
        .checked_mul(per_page)
        .and_then(|o| i64::try_from(o).ok())
        .unwrap_or(i64::MAX);
    (i64::try_from(per_page).unwrap_or(i64::MAX), offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_navigation_flags() {
        let page: Page<()> = Page {
            items: vec![],
            page: 2,
            per_page: 5,
            total: 11,
        };
        assert!(page.has_prev());
        assert!(page.has_next());
        assert_eq!(page.pages(), 3);

        let last: Page<()> = Page {
            items: vec![],
            page: 3,
            per_page: 5,
            total: 11,
        };
        assert!(!last.has_next());
    }

    #[test]
    fn limit_offset_clamps_zero_page() {
        assert_eq!(limit_offset(0, 10), (10, 0));
        assert_eq!(limit_offset(3, 10), (10, 20));
        assert_eq!(limit_offset(1, 0), (1, 0));
    }

    #[test]
    fn huge_page_numbers_saturate() {
        assert_eq!(limit_offset(usize::MAX, 10), (10, i64::MAX));
        assert_eq!(limit_offset(usize::MAX / 2, 2).1, i64::MAX);

        let far: Page<()> = Page {
            items: vec![],
            page: usize::MAX,
            per_page: 10,
            total: 3,
        };
        assert!(!far.has_next());
        assert!(far.has_prev());
    }

    #[test]
    fn password_is_not_serialized() {
        let user = User {
            id: 1,
            username: "julian".into(),
            email: "julian@example.com".into(),
            profile_pic: DEFAULT_PROFILE_PIC.into(),
            password: "$argon2id$secret".into(),
            is_admin: true,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
    }
}
