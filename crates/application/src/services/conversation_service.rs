use std::sync::Arc;

use domain::{
    Conversation, ConversationId, ConversationKind, ConversationParticipant, DomainError,
    RepositoryError, RoomName, UserId,
};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dto::{ConversationDto, MessageDto, ParticipantDto},
    error::ApplicationError,
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub name: String,
    pub kind: ConversationKind,
    pub creator_id: Uuid,
}

pub struct ConversationServiceDependencies {
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub user_repository: Arc<dyn UserRepository>,
    pub clock: Arc<dyn Clock>,
}

/// 会话（房间）管理：创建、列表与详情视图。
pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    pub async fn create(
        &self,
        request: CreateConversationRequest,
    ) -> Result<ConversationDto, ApplicationError> {
        let name = RoomName::parse(request.name)?;
        let creator_id = UserId::from(request.creator_id);
        let now = self.deps.clock.now();

        let conversation = Conversation::new(
            ConversationId::from(Uuid::new_v4()),
            name,
            request.kind,
            now,
        );
        let stored = self
            .deps
            .conversation_repository
            .create(conversation)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => {
                    ApplicationError::Domain(DomainError::ConversationAlreadyExists)
                }
                other => ApplicationError::from(other),
            })?;

        self.deps
            .conversation_repository
            .add_participant(ConversationParticipant::new(stored.id, creator_id, now))
            .await?;

        tracing::info!(conversation = %stored.name, "conversation created");
        self.to_dto(&stored).await
    }

    pub async fn get(&self, name: &str) -> Result<ConversationDto, ApplicationError> {
        let name = RoomName::parse(name).map_err(|_| DomainError::ConversationNotFound)?;
        let conversation = self
            .deps
            .conversation_repository
            .find_by_name(name)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;
        self.to_dto(&conversation).await
    }

    pub async fn list(&self) -> Result<Vec<ConversationDto>, ApplicationError> {
        let conversations = self.deps.conversation_repository.list().await?;
        let mut items = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            items.push(self.to_dto(conversation).await?);
        }
        Ok(items)
    }

    async fn to_dto(&self, conversation: &Conversation) -> Result<ConversationDto, ApplicationError> {
        let mut participants = Vec::new();
        for participant in self
            .deps
            .conversation_repository
            .list_participants(conversation.id)
            .await?
        {
            if let Some(user) = self
                .deps
                .user_repository
                .find_by_id(participant.user_id)
                .await?
            {
                participants.push(ParticipantDto::new(&participant, &user));
            }
        }

        let last_message = match self
            .deps
            .message_repository
            .last_message(conversation.id)
            .await?
        {
            Some(message) => self
                .deps
                .user_repository
                .find_by_id(message.sender_id)
                .await?
                .map(|sender| MessageDto::new(&message, &sender)),
            None => None,
        };

        Ok(ConversationDto::new(conversation, participants, last_message))
    }
}
