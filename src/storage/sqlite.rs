//! `SQLite` backend: schema, pragmas, migrations and read queries.
//!
//! Writes go through [`UnitOfWork`](super::unit_of_work::UnitOfWork), which
//! tracks pending changes so the search index can follow each commit.

use crate::model::types::{
    Book, Comment, Page, Post, PostDetail, Tag, TagGroup, User, limit_offset,
};
use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::info;

use super::unit_of_work::UnitOfWork;

/// Public schema version constant for external checks.
pub const CURRENT_SCHEMA_VERSION: i64 = SCHEMA_VERSION;

const SCHEMA_VERSION: i64 = 2;

const MIGRATION_V1: &str = r"
CREATE TABLE IF NOT EXISTS user (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    profile_pic TEXT NOT NULL DEFAULT 'default.png',
    password TEXT NOT NULL,
    is_admin INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS post (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    date_posted INTEGER NOT NULL,
    content TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS comment (
    id INTEGER PRIMARY KEY,
    date_posted INTEGER NOT NULL,
    content TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES user(id) ON DELETE CASCADE,
    post_id INTEGER NOT NULL REFERENCES post(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS tag (
    id INTEGER PRIMARY KEY,
    content TEXT NOT NULL,
    post_id INTEGER NOT NULL REFERENCES post(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS book (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    authors TEXT NOT NULL,
    edition TEXT NOT NULL,
    link TEXT,
    description TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_username ON user(username);
CREATE INDEX IF NOT EXISTS idx_post_title ON post(title);
CREATE INDEX IF NOT EXISTS idx_post_date_posted ON post(date_posted DESC);
CREATE INDEX IF NOT EXISTS idx_comment_post_date ON comment(post_id, date_posted);
CREATE INDEX IF NOT EXISTS idx_tag_post ON tag(post_id);
CREATE INDEX IF NOT EXISTS idx_tag_content ON tag(content);
CREATE INDEX IF NOT EXISTS idx_book_title ON book(title);
";

// At most one admin account.
const MIGRATION_V2: &str = r"
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_single_admin ON user(is_admin) WHERE is_admin = 1;
";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating db directory {}", parent.display()))?;
        }

        let start = Instant::now();
        let mut conn = Connection::open(path)
            .with_context(|| format!("opening sqlite db at {}", path.display()))?;

        apply_pragmas(&mut conn)?;
        init_meta(&mut conn)?;
        migrate(&mut conn)?;

        info!(
            path = %path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "opened SQLite database"
        );
        Ok(Self { conn })
    }

    pub fn raw(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.conn
            .query_row(
                "SELECT value FROM meta WHERE key='schema_version'",
                [],
                |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
            )
            .optional()?
            .ok_or_else(|| anyhow!("schema_version missing"))
    }

    /// Start a unit of work. Dropping it without committing rolls back.
    pub fn begin(&mut self) -> Result<UnitOfWork<'_>> {
        let tx = self.conn.transaction().context("beginning transaction")?;
        Ok(UnitOfWork::new(tx))
    }

    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // ---------------------------------------------------------------------
    // Users
    // ---------------------------------------------------------------------

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        user_by_id(&self.conn, id)
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        query_user(&self.conn, "email = ?", email)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        query_user(&self.conn, "username = ?", username)
    }

    pub fn admin_exists(&self) -> Result<bool> {
        admin_exists(&self.conn)
    }

    // ---------------------------------------------------------------------
    // Posts
    // ---------------------------------------------------------------------

    pub fn post_by_id(&self, id: i64) -> Result<Option<Post>> {
        post_by_id(&self.conn, id)
    }

    pub fn post_detail(&self, id: i64) -> Result<Option<PostDetail>> {
        let Some(post) = self.post_by_id(id)? else {
            return Ok(None);
        };
        let author = self
            .conn
            .query_row(
                "SELECT username FROM user WHERE id = ?",
                params![post.user_id],
                |row| row.get(0),
            )
            .with_context(|| format!("fetching author of post {id}"))?;
        let comments = self.comments_for_post(id)?;
        let tags = self.tags_for_post(id)?;
        Ok(Some(PostDetail {
            post,
            author,
            comments,
            tags,
        }))
    }

    /// Newest first.
    pub fn posts_page(&self, page: usize, per_page: usize) -> Result<Page<Post>> {
        let (limit, offset) = limit_offset(page, per_page);
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM post", [], |row| row.get(0))?;
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, date_posted, user_id FROM post
             ORDER BY date_posted DESC, id DESC LIMIT ? OFFSET ?",
        )?;
        let items = stmt
            .query_map(params![limit, offset], row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            items,
            page: page.max(1),
            per_page: per_page.max(1),
            total: total as usize,
        })
    }

    pub fn recent_posts(&self, limit: usize) -> Result<Vec<Post>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, date_posted, user_id FROM post
             ORDER BY date_posted DESC, id DESC LIMIT ?",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Posts carrying `tag`, newest first.
    pub fn posts_by_tag_page(&self, tag: &str, page: usize, per_page: usize) -> Result<Page<Post>> {
        let (limit, offset) = limit_offset(page, per_page);
        let total: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM post WHERE id IN (SELECT post_id FROM tag WHERE content = ?)",
            params![tag],
            |row| row.get(0),
        )?;
        let mut stmt = self.conn.prepare(
            "SELECT id, title, content, date_posted, user_id FROM post
             WHERE id IN (SELECT post_id FROM tag WHERE content = ?)
             ORDER BY date_posted DESC, id DESC LIMIT ? OFFSET ?",
        )?;
        let items = stmt
            .query_map(params![tag, limit, offset], row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(Page {
            items,
            page: page.max(1),
            per_page: per_page.max(1),
            total: total as usize,
        })
    }

    /// Fetch posts for `ids`, keeping the order of `ids` rather than the
    /// table's natural order. Ids with no row are skipped.
    pub fn posts_by_ids_ranked(&self, ids: &[i64]) -> Result<Vec<Post>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let when = (0..ids.len())
            .map(|pos| format!("WHEN ? THEN {pos}"))
            .collect::<Vec<_>>()
            .join(" ");
        let sql = format!(
            "SELECT id, title, content, date_posted, user_id FROM post
             WHERE id IN ({placeholders})
             ORDER BY CASE id {when} END"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let bound = ids.iter().chain(ids.iter());
        let rows = stmt
            .query_map(params_from_iter(bound), row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn all_posts(&self) -> Result<Vec<Post>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, content, date_posted, user_id FROM post ORDER BY id")?;
        let rows = stmt
            .query_map([], row_to_post)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_posts(&self) -> Result<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM post", [], |row| row.get(0))?)
    }

    // ---------------------------------------------------------------------
    // Comments & tags
    // ---------------------------------------------------------------------

    /// Oldest first.
    pub fn comments_for_post(&self, post_id: i64) -> Result<Vec<Comment>> {
        comments_for_post(&self.conn, post_id)
    }

    pub fn tags_for_post(&self, post_id: i64) -> Result<Vec<Tag>> {
        tags_for_post(&self.conn, post_id)
    }

    /// Every distinct tag with the posts carrying it, tags alphabetical and
    /// posts newest first. A post tagged twice with the same label appears
    /// once under it.
    pub fn tag_groups(&self) -> Result<Vec<TagGroup>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT t.content, p.id, p.title, p.content, p.date_posted, p.user_id
             FROM tag t JOIN post p ON p.id = t.post_id
             ORDER BY t.content, p.date_posted DESC, p.id DESC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let tag: String = row.get(0)?;
                let post = Post {
                    id: row.get(1)?,
                    title: row.get(2)?,
                    content: row.get(3)?,
                    date_posted: row.get(4)?,
                    user_id: row.get(5)?,
                };
                Ok((tag, post))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut groups: Vec<TagGroup> = Vec::new();
        for (tag, post) in rows {
            match groups.last_mut() {
                Some(group) if group.tag == tag => group.posts.push(post),
                _ => groups.push(TagGroup {
                    tag,
                    posts: vec![post],
                }),
            }
        }
        Ok(groups)
    }

    // ---------------------------------------------------------------------
    // Books
    // ---------------------------------------------------------------------

    pub fn book_by_id(&self, id: i64) -> Result<Option<Book>> {
        self.conn
            .query_row(
                "SELECT id, title, authors, edition, link, description FROM book WHERE id = ?",
                params![id],
                row_to_book,
            )
            .optional()
            .with_context(|| format!("fetching book {id}"))
    }

    pub fn list_books(&self) -> Result<Vec<Book>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, title, authors, edition, link, description FROM book ORDER BY id")?;
        let rows = stmt
            .query_map([], row_to_book)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

// -------------------------------------------------------------------------
// Row mapping and shared queries (usable from a plain connection or a
// transaction)
// -------------------------------------------------------------------------

const USER_COLUMNS: &str = "id, username, email, profile_pic, password, is_admin";

pub(crate) fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        profile_pic: row.get(3)?,
        password: row.get(4)?,
        is_admin: row.get::<_, i64>(5)? != 0,
    })
}

pub(crate) fn row_to_post(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        date_posted: row.get(3)?,
        user_id: row.get(4)?,
    })
}

pub(crate) fn row_to_comment(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get(0)?,
        content: row.get(1)?,
        date_posted: row.get(2)?,
        user_id: row.get(3)?,
        post_id: row.get(4)?,
    })
}

pub(crate) fn row_to_tag(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        content: row.get(1)?,
        post_id: row.get(2)?,
    })
}

pub(crate) fn row_to_book(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        title: row.get(1)?,
        authors: row.get(2)?,
        edition: row.get(3)?,
        link: row.get(4)?,
        description: row.get(5)?,
    })
}

pub(crate) fn user_by_id(conn: &Connection, id: i64) -> Result<Option<User>> {
    query_user(conn, "id = ?", id)
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, filter: &str, value: P) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM user WHERE {filter}"),
        params![value],
        row_to_user,
    )
    .optional()
    .with_context(|| format!("fetching user where {filter}"))
}

pub(crate) fn admin_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM user WHERE is_admin = 1",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn post_by_id(conn: &Connection, id: i64) -> Result<Option<Post>> {
    conn.query_row(
        "SELECT id, title, content, date_posted, user_id FROM post WHERE id = ?",
        params![id],
        row_to_post,
    )
    .optional()
    .with_context(|| format!("fetching post {id}"))
}

pub(crate) fn posts_by_user(conn: &Connection, user_id: i64) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, content, date_posted, user_id FROM post WHERE user_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![user_id], row_to_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn comments_for_post(conn: &Connection, post_id: i64) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, content, date_posted, user_id, post_id FROM comment
         WHERE post_id = ? ORDER BY date_posted ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![post_id], row_to_comment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn comments_by_user(conn: &Connection, user_id: i64) -> Result<Vec<Comment>> {
    let mut stmt = conn.prepare(
        "SELECT id, content, date_posted, user_id, post_id FROM comment WHERE user_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![user_id], row_to_comment)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn tags_for_post(conn: &Connection, post_id: i64) -> Result<Vec<Tag>> {
    let mut stmt = conn.prepare("SELECT id, content, post_id FROM tag WHERE post_id = ? ORDER BY id")?;
    let rows = stmt
        .query_map(params![post_id], row_to_tag)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// -------------------------------------------------------------------------
// Pragmas & migrations
// -------------------------------------------------------------------------

fn apply_pragmas(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        r"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch(
        r"
        PRAGMA temp_store = MEMORY;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

fn init_meta(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;

    let existing: Option<i64> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?;

    if existing.is_none() {
        // Start at version 0 so migrate() applies full schema on first open.
        conn.execute(
            "INSERT INTO meta(key, value) VALUES('schema_version', '0')",
            [],
        )?;
    }

    Ok(())
}

fn migrate(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0).map(|s| s.parse().unwrap_or(0)),
        )
        .optional()?
        .unwrap_or(0);

    if current == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    match current {
        0 => {
            tx.execute_batch(MIGRATION_V1)?;
            tx.execute_batch(MIGRATION_V2)?;
        }
        1 => {
            tx.execute_batch(MIGRATION_V2)?;
        }
        v => return Err(anyhow!("unsupported schema version {v}")),
    }

    tx.execute(
        "UPDATE meta SET value = ? WHERE key = 'schema_version'",
        params![SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()?;
    info!(from = current, to = SCHEMA_VERSION, "migrated database schema");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fresh_db_is_at_current_version() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("blog.db")).unwrap();
        assert_eq!(storage.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn reopen_does_not_rerun_migrations() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blog.db");
        drop(SqliteStorage::open(&path).unwrap());
        let storage = SqliteStorage::open(&path).unwrap();
        assert_eq!(storage.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn v1_database_gets_single_admin_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blog.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(MIGRATION_V1).unwrap();
            conn.execute_batch(
                "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO meta VALUES ('schema_version', '1');",
            )
            .unwrap();
        }
        let storage = SqliteStorage::open(&path).unwrap();
        let idx: i64 = storage
            .raw()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='index' AND name='idx_user_single_admin'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn unsupported_schema_version_errors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blog.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO meta VALUES ('schema_version', '99');",
            )
            .unwrap();
        }
        let err = SqliteStorage::open(&path).err().expect("should fail");
        assert!(err.to_string().contains("unsupported schema version"));
    }

    #[test]
    fn ranked_fetch_of_empty_ids_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = SqliteStorage::open(&dir.path().join("blog.db")).unwrap();
        assert!(storage.posts_by_ids_ranked(&[]).unwrap().is_empty());
    }
}
