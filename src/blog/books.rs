//! Book catalog. Anyone reads it; only the admin changes it.

use super::forms::BookForm;
use super::{Blog, BlogError, BlogResult};
use crate::model::types::{Book, NewBook};
use crate::storage::SqliteStorage;

/// Callers keep holding `store` through their write.
fn require_admin(store: &SqliteStorage, user_id: i64) -> BlogResult<()> {
    let user = store.user_by_id(user_id)?.ok_or(BlogError::Unauthorized)?;
    if user.is_admin {
        Ok(())
    } else {
        Err(BlogError::Forbidden)
    }
}

impl Blog {
    pub fn add_book(&self, user_id: i64, form: &BookForm) -> BlogResult<Book> {
        let mut store = self.store();
        require_admin(&store, user_id)?;
        form.validate().into_result()?;
        let mut uow = store.begin()?;
        let book = uow.add_book(NewBook {
            title: form.title.clone(),
            authors: form.authors.clone(),
            edition: form.edition.clone(),
            link: form.link(),
            description: form.description.clone(),
        })?;
        uow.commit(&self.index)?;
        Ok(book)
    }

    pub fn books(&self) -> BlogResult<Vec<Book>> {
        Ok(self.store().list_books()?)
    }

    pub fn book(&self, book_id: i64) -> BlogResult<Book> {
        self.store().book_by_id(book_id)?.ok_or(BlogError::NotFound)
    }

    /// Overwrite the book's fields. A blank link keeps the current one.
    pub fn update_book(&self, user_id: i64, book_id: i64, form: &BookForm) -> BlogResult<Book> {
        let mut store = self.store();
        let mut book = store.book_by_id(book_id)?.ok_or(BlogError::NotFound)?;
        require_admin(&store, user_id)?;
        form.validate().into_result()?;

        book.title = form.title.clone();
        book.authors = form.authors.clone();
        book.edition = form.edition.clone();
        if let Some(link) = form.link() {
            book.link = Some(link);
        }
        book.description = form.description.clone();

        let mut uow = store.begin()?;
        uow.update_book(&book)?;
        uow.commit(&self.index)?;
        Ok(book)
    }

    pub fn delete_book(&self, user_id: i64, book_id: i64) -> BlogResult<()> {
        let mut store = self.store();
        let book = store.book_by_id(book_id)?.ok_or(BlogError::NotFound)?;
        require_admin(&store, user_id)?;
        let mut uow = store.begin()?;
        uow.delete_book(&book)?;
        uow.commit(&self.index)?;
        Ok(())
    }
}
