//! Alert mail through a local sendmail-compatible relay.

use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Failed to run mail command {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("Mail command {0} exited with {1:?}")]
    Exit(String, Option<i32>),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Pipes an RFC 822 message into `<command> -t`.
#[derive(Debug, Clone)]
pub struct SendmailMailer {
    command: String,
    from: String,
}

impl SendmailMailer {
    pub fn new(command: &str, from: &str) -> Self {
        Self {
            command: command.to_string(),
            from: from.to_string(),
        }
    }

    pub fn message(&self, to: &str, subject: &str, body: &str) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\nContent-Type: text/plain; charset=utf-8\n\n{}\n",
            self.from, to, subject, body
        )
    }
}

#[async_trait]
impl Mailer for SendmailMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let spawn_err = |e| MailError::Spawn(self.command.clone(), e);

        let mut child = Command::new(&self.command)
            .arg("-t")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(spawn_err)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(self.message(to, subject, body).as_bytes())
                .await
                .map_err(spawn_err)?;
        }

        let status = child.wait().await.map_err(spawn_err)?;
        if !status.success() {
            return Err(MailError::Exit(self.command.clone(), status.code()));
        }
        tracing::info!(to, subject, "alert mail sent");
        Ok(())
    }
}
