use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::UserId;

use crate::kinda_db::ReportStore;
use crate::model::{Report, SubjectId};

const TELEGRAM_TEXT_LIMIT: usize = 4096;

#[async_trait]
pub trait ChatSink: Send + Sync {
    async fn send_to(&self, chat_id: ChatId, text: &str) -> Result<(), teloxide::RequestError>;

    /// Private chat of the subject.
    async fn send_text(&self, subject: SubjectId, text: &str) -> Result<(), teloxide::RequestError> {
        self.send_to(ChatId::from(UserId(subject.0)), text).await
    }
}

#[async_trait]
impl ChatSink for Bot {
    async fn send_to(&self, chat_id: ChatId, text: &str) -> Result<(), teloxide::RequestError> {
        for chunk in split_message(text, TELEGRAM_TEXT_LIMIT) {
            self.send_message(chat_id, chunk).await?;
        }
        Ok(())
    }
}

fn split_message(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    pub chat_delivered: bool,
    pub web_handle: String,
}

#[derive(Clone)]
pub struct ReportPublisher {
    store: Arc<dyn ReportStore>,
    public_url: String,
}

impl ReportPublisher {
    pub fn new(store: Arc<dyn ReportStore>, public_url: &str) -> ReportPublisher {
        ReportPublisher {
            store,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn web_handle(&self, subject: SubjectId) -> String {
        format!("{}/report/{}", self.public_url, subject)
    }

    /// Registers the report for the web view, then delivers it to the chat.
    /// A failed delivery is reported in the outcome, never raised.
    pub async fn publish(&self, sink: &dyn ChatSink, report: Report) -> PublishOutcome {
        let subject = report.subject_id;
        let body = report.body_text.clone();
        self.store.put(report).await;

        let chat_delivered = match sink.send_text(subject, &body).await {
            Ok(()) => true,
            Err(err) => {
                log::error!("could not deliver report to {}: {}", subject, err);
                false
            }
        };

        PublishOutcome {
            chat_delivered,
            web_handle: self.web_handle(subject),
        }
    }
}
