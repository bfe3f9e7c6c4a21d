use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatMemberKind, Recipient, UserId};

use crate::error::MembershipError;
use crate::model::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipStatus {
    Member,
    Admin,
    Owner,
    None,
}

impl MembershipStatus {
    pub fn is_authorized(self) -> bool {
        matches!(self, MembershipStatus::Member | MembershipStatus::Admin | MembershipStatus::Owner)
    }
}

#[async_trait]
pub trait MembershipCheck: Send + Sync {
    async fn check_member(
        &self,
        channel: &str,
        subject: SubjectId,
    ) -> Result<MembershipStatus, MembershipError>;
}

fn channel_recipient(channel: &str) -> Result<Recipient, MembershipError> {
    if channel.starts_with('@') {
        return Ok(Recipient::ChannelUsername(channel.to_string()));
    }
    channel
        .parse::<i64>()
        .map(|id| Recipient::Id(ChatId(id)))
        .map_err(|_| MembershipError::InvalidChannel(channel.to_string()))
}

#[async_trait]
impl MembershipCheck for Bot {
    async fn check_member(
        &self,
        channel: &str,
        subject: SubjectId,
    ) -> Result<MembershipStatus, MembershipError> {
        let member = self
            .get_chat_member(channel_recipient(channel)?, UserId(subject.0))
            .await?;

        let status = match member.kind {
            ChatMemberKind::Owner(_) => MembershipStatus::Owner,
            ChatMemberKind::Administrator(_) => MembershipStatus::Admin,
            ChatMemberKind::Member => MembershipStatus::Member,
            _ => MembershipStatus::None,
        };
        Ok(status)
    }
}

/// Channel-subscription gate. Every call asks the platform again; nothing is cached.
#[derive(Clone)]
pub struct AccessGate {
    checker: Arc<dyn MembershipCheck>,
    channel: String,
}

impl AccessGate {
    pub fn new(checker: Arc<dyn MembershipCheck>, channel: impl Into<String>) -> AccessGate {
        AccessGate {
            checker,
            channel: channel.into(),
        }
    }

    pub async fn is_authorized(&self, subject: SubjectId) -> bool {
        match self.checker.check_member(&self.channel, subject).await {
            Ok(status) => {
                log::info!("membership of {} in {}: {:?}", subject, self.channel, status);
                status.is_authorized()
            }
            Err(err) => {
                log::warn!("membership check for {} failed, denying: {}", subject, err);
                false
            }
        }
    }
}
