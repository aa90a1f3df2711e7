#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tempfile::TempDir;

use personal_blog::auth::TokenSigner;
use personal_blog::blog::files::FileStore;
use personal_blog::blog::forms::{PostForm, RegistrationForm};
use personal_blog::blog::mail::{MailMessage, MailTransport, Mailer};
use personal_blog::blog::{Blog, BlogSettings};
use personal_blog::model::types::User;
use personal_blog::search::client::{IndexBackend, IndexClient};
use personal_blog::search::searchable::SearchFields;
use personal_blog::storage::SqliteStorage;

pub const SECRET: &[u8] = b"test-secret";

/// Captures tracing output for tests.
pub struct TestTracing {
    buffer: Arc<std::sync::Mutex<Vec<u8>>>,
}

impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// In-memory index with naive term matching. Can be switched to fail every
/// call, to simulate an outage.
#[derive(Default)]
pub struct MemoryBackend {
    docs: Mutex<HashMap<(String, i64), SearchFields>>,
    down: AtomicBool,
}

impl MemoryBackend {
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn contains(&self, collection: &str, id: i64) -> bool {
        self.docs.lock().contains_key(&(collection.to_string(), id))
    }

    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    fn check(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            bail!("index backend unreachable");
        }
        Ok(())
    }
}

impl IndexBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn index(&self, collection: &str, id: i64, fields: &SearchFields) -> Result<()> {
        self.check()?;
        self.docs
            .lock()
            .insert((collection.to_string(), id), fields.clone());
        Ok(())
    }

    fn delete(&self, collection: &str, id: i64) -> Result<()> {
        self.check()?;
        self.docs.lock().remove(&(collection.to_string(), id));
        Ok(())
    }

    fn search(
        &self,
        collection: &str,
        expression: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<i64>, u64)> {
        self.check()?;
        let needle = expression.to_lowercase();
        let mut hits: Vec<i64> = self
            .docs
            .lock()
            .iter()
            .filter(|((coll, _), fields)| {
                coll == collection
                    && fields
                        .values()
                        .any(|v| v.to_lowercase().split_whitespace().any(|w| w == needle))
            })
            .map(|((_, id), _)| *id)
            .collect();
        // Highest id ranks first, so relevance order differs from insert order.
        hits.sort_unstable_by(|a, b| b.cmp(a));
        let total = hits.len() as u64;
        Ok((hits.into_iter().skip(offset).take(limit).collect(), total))
    }
}

/// Hands each message to a channel the test can wait on.
pub struct ChannelTransport(pub Sender<MailMessage>);

impl MailTransport for ChannelTransport {
    fn send(&mut self, message: &MailMessage) -> Result<()> {
        self.0.send(message.clone())?;
        Ok(())
    }
}

pub struct TestBlog {
    pub dir: TempDir,
    pub blog: Arc<Blog>,
    pub mail: Receiver<MailMessage>,
}

impl TestBlog {
    pub fn new(index: IndexClient) -> Self {
        Self::with_settings(index, BlogSettings::default())
    }

    pub fn with_settings(index: IndexClient, settings: BlogSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let store = SqliteStorage::open(&dir.path().join("blog.db")).unwrap();
        let (tx, rx) = unbounded();
        let blog = Blog::new(
            store,
            index,
            TokenSigner::new(SECRET),
            FileStore::open(&dir.path().join("post_images")).unwrap(),
            FileStore::open(&dir.path().join("profile_pics")).unwrap(),
            Mailer::spawn(Box::new(ChannelTransport(tx))),
            settings,
        );
        Self {
            dir,
            blog: Arc::new(blog),
            mail: rx,
        }
    }

    pub fn register(&self, username: &str) -> User {
        self.blog
            .register(&registration(username, "secret-pw"))
            .unwrap()
    }

    pub fn next_mail(&self) -> MailMessage {
        self.mail
            .recv_timeout(Duration::from_secs(5))
            .expect("mail delivered")
    }

    pub fn db_count(&self, sql: &str) -> i64 {
        let store = SqliteStorage::open(&self.dir.path().join("blog.db")).unwrap();
        store.raw().query_row(sql, [], |r| r.get(0)).unwrap()
    }
}

pub fn registration(username: &str, password: &str) -> RegistrationForm {
    RegistrationForm {
        username: username.into(),
        email: format!("{username}@example.com"),
        password: password.into(),
        confirm_password: password.into(),
    }
}

pub fn post_form(title: &str, tags: &str, content: &str) -> PostForm {
    PostForm {
        title: title.into(),
        tags: tags.into(),
        content: content.into(),
    }
}
