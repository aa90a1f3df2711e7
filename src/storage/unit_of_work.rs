//! Unit of work: a transaction plus the set of entities it touched.
//!
//! Every write goes through a [`UnitOfWork`]. Besides executing SQL it records
//! the affected entities in [`PendingChanges`] (created / modified / deleted),
//! including rows removed by `ON DELETE CASCADE`. Commit hooks see those sets
//! right before the transaction commits, and get a second call once the commit
//! has succeeded.

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, params};
use thiserror::Error;

use super::sqlite::{
    SqliteStorage, admin_exists, comments_by_user, comments_for_post, posts_by_user,
    tags_for_post,
};
use crate::model::types::{
    Book, Comment, DEFAULT_PROFILE_PIC, NewBook, NewPost, NewUser, Post, Tag, User,
};
use crate::search::client::IndexClient;
use crate::search::searchable::Searchable;
use crate::search::sync::{SearchSync, SyncReport};

/// Typed storage failures callers may want to tell apart from I/O or SQL
/// errors. Travels inside `anyhow::Error`; recover it with `downcast_ref`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("{table} {id} does not exist")]
    NotFound { table: &'static str, id: i64 },
}

/// An UPDATE that matched no row means the entity was deleted since it was
/// read; nothing is recorded as dirty.
fn ensure_updated(affected: usize, table: &'static str, id: i64) -> Result<()> {
    if affected == 0 {
        return Err(StorageError::NotFound { table, id }.into());
    }
    Ok(())
}

/// Any persisted entity, as recorded in a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedEntity {
    User(User),
    Post(Post),
    Comment(Comment),
    Tag(Tag),
    Book(Book),
}

impl TrackedEntity {
    /// The searchable view of this entity, if its type is mirrored into the
    /// full-text index.
    pub fn as_searchable(&self) -> Option<&dyn Searchable> {
        match self {
            TrackedEntity::Post(post) => Some(post),
            _ => None,
        }
    }
}

/// Entities touched by a unit of work, bucketed by what happened to them.
#[derive(Debug, Default, Clone)]
pub struct PendingChanges {
    pub new: Vec<TrackedEntity>,
    pub dirty: Vec<TrackedEntity>,
    pub deleted: Vec<TrackedEntity>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.deleted.is_empty()
    }
}

/// Hooks run around a commit.
///
/// `before_commit` must capture whatever it needs from `pending`: the change
/// sets are gone once the transaction commits.
pub trait CommitHook {
    type Snapshot;
    type Outcome;

    fn before_commit(&self, pending: &PendingChanges) -> Self::Snapshot;
    fn after_commit(&self, snapshot: Self::Snapshot) -> Self::Outcome;
}

pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    pending: PendingChanges,
}

impl<'conn> UnitOfWork<'conn> {
    pub(crate) fn new(tx: Transaction<'conn>) -> Self {
        Self {
            tx,
            pending: PendingChanges::default(),
        }
    }

    /// Connection view of the open transaction, for reads that must see the
    /// uncommitted writes.
    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    /// Commit, keeping the search index in step with what was written.
    pub fn commit(self, index: &IndexClient) -> Result<SyncReport> {
        self.commit_with(&SearchSync::new(index))
    }

    pub fn commit_with<H: CommitHook>(self, hook: &H) -> Result<H::Outcome> {
        let snapshot = hook.before_commit(&self.pending);
        self.tx.commit().context("committing unit of work")?;
        Ok(hook.after_commit(snapshot))
    }

    pub fn rollback(self) -> Result<()> {
        self.tx.rollback().context("rolling back unit of work")
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub fn admin_exists(&self) -> Result<bool> {
        admin_exists(&self.tx)
    }

    pub fn add_user(&mut self, new: NewUser) -> Result<User> {
        self.tx
            .execute(
                "INSERT INTO user(username, email, profile_pic, password, is_admin)
                 VALUES(?,?,?,?,?)",
                params![
                    &new.username,
                    &new.email,
                    DEFAULT_PROFILE_PIC,
                    &new.password_hash,
                    new.is_admin as i64
                ],
            )
            .with_context(|| format!("inserting user {}", new.username))?;
        let user = User {
            id: self.tx.last_insert_rowid(),
            username: new.username,
            email: new.email,
            profile_pic: DEFAULT_PROFILE_PIC.to_string(),
            password: new.password_hash,
            is_admin: new.is_admin,
        };
        self.pending.new.push(TrackedEntity::User(user.clone()));
        Ok(user)
    }

    pub fn update_user(&mut self, user: &User) -> Result<()> {
        let affected = self
            .tx
            .execute(
                "UPDATE user SET username = ?, email = ?, profile_pic = ?, password = ?, is_admin = ?
                 WHERE id = ?",
                params![
                    &user.username,
                    &user.email,
                    &user.profile_pic,
                    &user.password,
                    user.is_admin as i64,
                    user.id
                ],
            )
            .with_context(|| format!("updating user {}", user.id))?;
        ensure_updated(affected, "user", user.id)?;
        self.pending.dirty.push(TrackedEntity::User(user.clone()));
        Ok(())
    }

    /// Delete a user together with their posts (and those posts' comments
    /// and tags) and their comments on other posts.
    pub fn delete_user(&mut self, user: &User) -> Result<()> {
        for post in posts_by_user(&self.tx, user.id)? {
            self.record_post_cascade(&post)?;
            self.pending.deleted.push(TrackedEntity::Post(post));
        }
        for comment in comments_by_user(&self.tx, user.id)? {
            let already = self
                .pending
                .deleted
                .iter()
                .any(|e| matches!(e, TrackedEntity::Comment(c) if c.id == comment.id));
            if !already {
                self.pending.deleted.push(TrackedEntity::Comment(comment));
            }
        }
        self.tx
            .execute("DELETE FROM user WHERE id = ?", params![user.id])
            .with_context(|| format!("deleting user {}", user.id))?;
        self.pending.deleted.push(TrackedEntity::User(user.clone()));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Posts, tags, comments
    // ---------------------------------------------------------------------

    pub fn add_post(&mut self, new: NewPost) -> Result<Post> {
        let date_posted = SqliteStorage::now_millis();
        self.tx
            .execute(
                "INSERT INTO post(title, date_posted, content, user_id) VALUES(?,?,?,?)",
                params![&new.title, date_posted, &new.content, new.user_id],
            )
            .context("inserting post")?;
        let post = Post {
            id: self.tx.last_insert_rowid(),
            title: new.title,
            content: new.content,
            date_posted,
            user_id: new.user_id,
        };
        self.pending.new.push(TrackedEntity::Post(post.clone()));
        Ok(post)
    }

    pub fn update_post(&mut self, post: &Post) -> Result<()> {
        let affected = self
            .tx
            .execute(
                "UPDATE post SET title = ?, content = ? WHERE id = ?",
                params![&post.title, &post.content, post.id],
            )
            .with_context(|| format!("updating post {}", post.id))?;
        ensure_updated(affected, "post", post.id)?;
        self.pending.dirty.push(TrackedEntity::Post(post.clone()));
        Ok(())
    }

    pub fn delete_post(&mut self, post: &Post) -> Result<()> {
        self.record_post_cascade(post)?;
        self.tx
            .execute("DELETE FROM post WHERE id = ?", params![post.id])
            .with_context(|| format!("deleting post {}", post.id))?;
        self.pending.deleted.push(TrackedEntity::Post(post.clone()));
        Ok(())
    }

    /// Drop every tag of `post_id` and insert `contents` in order. No
    /// diffing and no de-duplication.
    pub fn replace_tags(&mut self, post_id: i64, contents: &[String]) -> Result<Vec<Tag>> {
        for old in tags_for_post(&self.tx, post_id)? {
            self.pending.deleted.push(TrackedEntity::Tag(old));
        }
        self.tx
            .execute("DELETE FROM tag WHERE post_id = ?", params![post_id])
            .with_context(|| format!("clearing tags of post {post_id}"))?;

        let mut tags = Vec::with_capacity(contents.len());
        {
            let mut stmt = self
                .tx
                .prepare_cached("INSERT INTO tag(content, post_id) VALUES(?,?)")?;
            for content in contents {
                stmt.execute(params![content, post_id])?;
                tags.push(Tag {
                    id: self.tx.last_insert_rowid(),
                    content: content.clone(),
                    post_id,
                });
            }
        }
        self.pending
            .new
            .extend(tags.iter().cloned().map(TrackedEntity::Tag));
        Ok(tags)
    }

    pub fn add_comment(&mut self, user_id: i64, post_id: i64, content: &str) -> Result<Comment> {
        let date_posted = SqliteStorage::now_millis();
        self.tx
            .execute(
                "INSERT INTO comment(date_posted, content, user_id, post_id) VALUES(?,?,?,?)",
                params![date_posted, content, user_id, post_id],
            )
            .with_context(|| format!("inserting comment on post {post_id}"))?;
        let comment = Comment {
            id: self.tx.last_insert_rowid(),
            content: content.to_string(),
            date_posted,
            user_id,
            post_id,
        };
        self.pending.new.push(TrackedEntity::Comment(comment.clone()));
        Ok(comment)
    }

    fn record_post_cascade(&mut self, post: &Post) -> Result<()> {
        for comment in comments_for_post(&self.tx, post.id)? {
            self.pending.deleted.push(TrackedEntity::Comment(comment));
        }
        for tag in tags_for_post(&self.tx, post.id)? {
            self.pending.deleted.push(TrackedEntity::Tag(tag));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Books
    // ---------------------------------------------------------------------

    pub fn add_book(&mut self, new: NewBook) -> Result<Book> {
        self.tx
            .execute(
                "INSERT INTO book(title, authors, edition, link, description) VALUES(?,?,?,?,?)",
                params![
                    &new.title,
                    &new.authors,
                    &new.edition,
                    &new.link,
                    &new.description
                ],
            )
            .context("inserting book")?;
        let book = Book {
            id: self.tx.last_insert_rowid(),
            title: new.title,
            authors: new.authors,
            edition: new.edition,
            link: new.link,
            description: new.description,
        };
        self.pending.new.push(TrackedEntity::Book(book.clone()));
        Ok(book)
    }

    pub fn update_book(&mut self, book: &Book) -> Result<()> {
        let affected = self
            .tx
            .execute(
                "UPDATE book SET title = ?, authors = ?, edition = ?, link = ?, description = ?
                 WHERE id = ?",
                params![
                    &book.title,
                    &book.authors,
                    &book.edition,
                    &book.link,
                    &book.description,
                    book.id
                ],
            )
            .with_context(|| format!("updating book {}", book.id))?;
        ensure_updated(affected, "book", book.id)?;
        self.pending.dirty.push(TrackedEntity::Book(book.clone()));
        Ok(())
    }

    pub fn delete_book(&mut self, book: &Book) -> Result<()> {
        self.tx
            .execute("DELETE FROM book WHERE id = ?", params![book.id])
            .with_context(|| format!("deleting book {}", book.id))?;
        self.pending.deleted.push(TrackedEntity::Book(book.clone()));
        Ok(())
    }
}
