//! Outbound mail on a background worker.
//!
//! Requests enqueue and return at once. The worker has no retry: a failed
//! send is logged and dropped, and the requester never hears about it.

use std::thread::JoinHandle;

use anyhow::Result;
use crossbeam_channel::{Sender, unbounded};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::model::types::User;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub body: String,
}

pub trait MailTransport: Send {
    fn send(&mut self, message: &MailMessage) -> Result<()>;
}

/// Writes messages to the log instead of delivering them.
pub struct LogTransport;

impl MailTransport for LogTransport {
    fn send(&mut self, message: &MailMessage) -> Result<()> {
        info!(
            subject = %message.subject,
            to = ?message.recipients,
            body = %message.body,
            "mail (log transport)"
        );
        Ok(())
    }
}

pub struct Mailer {
    tx: Mutex<Option<Sender<MailMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Mailer {
    pub fn spawn(mut transport: Box<dyn MailTransport>) -> Self {
        let (tx, rx) = unbounded::<MailMessage>();
        let worker = std::thread::Builder::new()
            .name("mailer".into())
            .spawn(move || {
                while let Ok(message) = rx.recv() {
                    if let Err(err) = transport.send(&message) {
                        warn!(
                            subject = %message.subject,
                            to = ?message.recipients,
                            error = %err,
                            "mail delivery failed"
                        );
                    }
                }
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(error = %err, "could not start mail worker; mail disabled");
                None
            }
        };
        Self {
            tx: Mutex::new(worker.as_ref().map(|_| tx)),
            worker: Mutex::new(worker),
        }
    }

    /// Queue `message`. Dropped with a warning after shutdown.
    pub fn enqueue(&self, message: MailMessage) {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(message).is_err() {
                    warn!("mail worker gone; message dropped");
                }
            }
            None => warn!(subject = %message.subject, "mailer stopped; message dropped"),
        }
    }

    /// Close the queue and wait for queued messages to be handed to the
    /// transport. Idempotent.
    pub fn shutdown(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.worker.lock().take()
            && handle.join().is_err()
        {
            warn!("mail worker panicked");
        }
    }
}

impl Drop for Mailer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The password-reset message for `user` carrying `reset_url`.
pub fn reset_email(user: &User, sender: &str, reset_url: &str) -> MailMessage {
    MailMessage {
        subject: "Password Reset Request".into(),
        sender: sender.to_string(),
        recipients: vec![user.email.clone()],
        body: format!(
            "To reset your password, visit the following link:\n{reset_url}\n\n\
             If you did not make this request, simply ignore this email.\n"
        ),
    }
}
