//! Posts, their tags and comments, listings, and search.

use tracing::info;

use super::files::{FILES_ROUTE, POST_IMAGE_EXTENSIONS};
use super::forms::{CommentForm, PostForm, SearchForm};
use super::{Blog, BlogError, BlogResult};
use crate::model::types::{Comment, NewPost, Page, Post, PostDetail, TagGroup, User};
use crate::search::query::{SearchOutcome, search_posts};
use crate::storage::SqliteStorage;

/// Number of posts in the sidebar.
pub const SIDEBAR_POSTS: usize = 5;

/// Split a space-separated tag string. Empty segments from repeated spaces
/// are dropped; duplicates are kept.
pub fn split_tags(raw: &str) -> Vec<String> {
    raw.split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn require_user(store: &SqliteStorage, user_id: i64) -> BlogResult<User> {
    store.user_by_id(user_id)?.ok_or(BlogError::Unauthorized)
}

/// Load a post its author may change. Callers keep holding `store` through
/// their write so the check cannot go stale.
fn owned_post(store: &SqliteStorage, user_id: i64, post_id: i64) -> BlogResult<Post> {
    let post = store.post_by_id(post_id)?.ok_or(BlogError::NotFound)?;
    if post.user_id != user_id {
        return Err(BlogError::Forbidden);
    }
    Ok(post)
}

impl Blog {
    /// Publish a post. Admin only.
    pub fn create_post(&self, user_id: i64, form: &PostForm) -> BlogResult<PostDetail> {
        let mut store = self.store();
        let author = require_user(&store, user_id)?;
        if !author.is_admin {
            return Err(BlogError::Forbidden);
        }
        form.validate().into_result()?;

        let mut uow = store.begin()?;
        let post = uow.add_post(NewPost {
            title: form.title.clone(),
            content: form.content.clone(),
            user_id,
        })?;
        let tags = uow.replace_tags(post.id, &split_tags(&form.tags))?;
        let report = uow.commit(&self.index)?;
        info!(
            post_id = post.id,
            tags = tags.len(),
            indexed = report.upserted,
            "created post"
        );
        Ok(PostDetail {
            post,
            author: author.username,
            comments: Vec::new(),
            tags,
        })
    }

    pub fn post(&self, post_id: i64) -> BlogResult<PostDetail> {
        self.store()
            .post_detail(post_id)?
            .ok_or(BlogError::NotFound)
    }

    /// Edit title, content and tags. Author only; the tag set is replaced
    /// wholesale.
    pub fn update_post(&self, user_id: i64, post_id: i64, form: &PostForm) -> BlogResult<PostDetail> {
        let mut store = self.store();
        let mut post = owned_post(&store, user_id, post_id)?;
        form.validate().into_result()?;
        post.title = form.title.clone();
        post.content = form.content.clone();

        let mut uow = store.begin()?;
        uow.update_post(&post)?;
        uow.replace_tags(post.id, &split_tags(&form.tags))?;
        uow.commit(&self.index)?;
        store.post_detail(post_id)?.ok_or(BlogError::NotFound)
    }

    /// Delete a post with its comments and tags, then the images its body
    /// referenced. Author only.
    pub fn delete_post(&self, user_id: i64, post_id: i64) -> BlogResult<()> {
        let post = {
            let mut store = self.store();
            let post = owned_post(&store, user_id, post_id)?;
            let mut uow = store.begin()?;
            uow.delete_post(&post)?;
            uow.commit(&self.index)?;
            post
        };
        let images = self.post_images.delete_post_images(&post.content);
        info!(post_id, images, "deleted post");
        Ok(())
    }

    pub fn comment(&self, user_id: i64, post_id: i64, form: &CommentForm) -> BlogResult<Comment> {
        let mut store = self.store();
        require_user(&store, user_id)?;
        form.validate().into_result()?;
        if store.post_by_id(post_id)?.is_none() {
            return Err(BlogError::NotFound);
        }
        let mut uow = store.begin()?;
        let comment = uow.add_comment(user_id, post_id, &form.content)?;
        uow.commit(&self.index)?;
        Ok(comment)
    }

    /// Newest first, `per_page_home` per page.
    pub fn home(&self, page: usize) -> BlogResult<Page<Post>> {
        Ok(self.store().posts_page(page, self.settings.per_page_home)?)
    }

    /// Newest first, `per_page_global` per page.
    pub fn all_posts(&self, page: usize) -> BlogResult<Page<Post>> {
        Ok(self.store().posts_page(page, self.settings.per_page_global)?)
    }

    pub fn posts_by_tag(&self, tag: &str, page: usize) -> BlogResult<Page<Post>> {
        Ok(self
            .store()
            .posts_by_tag_page(tag, page, self.settings.per_page_global)?)
    }

    pub fn tags(&self) -> BlogResult<Vec<TagGroup>> {
        Ok(self.store().tag_groups()?)
    }

    pub fn sidebar(&self) -> BlogResult<Vec<Post>> {
        Ok(self.store().recent_posts(SIDEBAR_POSTS)?)
    }

    /// Full-text search over post bodies. A missing backend is an error,
    /// no matches is a normal outcome.
    pub fn search(&self, form: &SearchForm) -> BlogResult<SearchOutcome> {
        form.validate().into_result()?;
        let page = form.page.unwrap_or(1).max(1);
        let store = self.store();
        let outcome = search_posts(
            &store,
            &self.index,
            form.q.trim(),
            page,
            self.settings.per_page_global,
        )?;
        match outcome {
            SearchOutcome::Unavailable => Err(BlogError::SearchUnavailable),
            other => Ok(other),
        }
    }

    /// Store an image for use inside post bodies; returns its URL.
    pub fn upload_post_image(&self, original_name: &str, bytes: &[u8]) -> BlogResult<String> {
        let name = self
            .post_images
            .save(original_name, bytes, POST_IMAGE_EXTENSIONS)?;
        Ok(format!("{FILES_ROUTE}/{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_split_on_single_spaces() {
        assert_eq!(split_tags("rust web"), vec!["rust", "web"]);
        assert_eq!(split_tags("rust  rust"), vec!["rust", "rust"]);
        assert!(split_tags("   ").is_empty());
    }
}
