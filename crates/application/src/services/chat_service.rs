use std::{collections::HashMap, sync::Arc};

use domain::{
    ChatEvent, DomainError, Message, MessageContent, MessageId, RoomName, User, UserId, Username,
};
use uuid::Uuid;

use crate::{
    broadcaster::RoomBus,
    clock::Clock,
    dto::MessageDto,
    error::ApplicationError,
    repository::{ConversationRepository, MessageRepository, UserRepository},
};

pub const DEFAULT_HISTORY_LIMIT: u32 = 50;
pub const MAX_HISTORY_LIMIT: u32 = 100;

#[derive(Debug, Clone)]
pub struct PostMessageRequest {
    pub room: RoomName,
    pub username: String,
    pub content: String,
}

pub struct ChatServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub conversation_repository: Arc<dyn ConversationRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub bus: Arc<dyn RoomBus>,
    pub clock: Arc<dyn Clock>,
}

/// 聊天用例：持久化消息并发布到房间总线。
pub struct ChatService {
    deps: ChatServiceDependencies,
}

impl ChatService {
    pub fn new(deps: ChatServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn bus(&self) -> Arc<dyn RoomBus> {
        self.deps.bus.clone()
    }

    /// 查找发送者与会话、保存消息，成功后发布 [`ChatEvent`]。
    ///
    /// 任何查找或保存失败都不会产生广播。
    pub async fn post_message(
        &self,
        request: PostMessageRequest,
    ) -> Result<ChatEvent, ApplicationError> {
        let username = Username::parse(request.username).map_err(|_| DomainError::UserNotFound)?;
        let content = MessageContent::new(request.content)?;

        let sender = self
            .deps
            .user_repository
            .find_by_username(username)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let conversation = self
            .deps
            .conversation_repository
            .find_by_name(request.room.clone())
            .await?
            .ok_or(DomainError::ConversationNotFound)?;

        let now = self.deps.clock.now();
        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            conversation.id,
            sender.id,
            content,
            now,
        );
        let stored = self.deps.message_repository.create(message).await?;

        let event = ChatEvent::new(
            request.room,
            sender.username.as_str(),
            stored.content.into_inner(),
            stored.timestamp,
        );
        let delivered = self.deps.bus.publish(event.clone()).await?;
        tracing::debug!(room = %event.room_id, delivered, "chat message published");

        Ok(event)
    }

    /// 房间最近的历史消息（时间正序）。
    pub async fn history(
        &self,
        room: RoomName,
        limit: Option<u32>,
    ) -> Result<Vec<MessageDto>, ApplicationError> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);

        let conversation = self
            .deps
            .conversation_repository
            .find_by_name(room)
            .await?
            .ok_or(DomainError::ConversationNotFound)?;

        let messages = self
            .deps
            .message_repository
            .list_recent(conversation.id, limit)
            .await?;

        let mut senders: HashMap<UserId, User> = HashMap::new();
        let mut items = Vec::with_capacity(messages.len());
        for message in &messages {
            if !senders.contains_key(&message.sender_id) {
                let Some(user) = self
                    .deps
                    .user_repository
                    .find_by_id(message.sender_id)
                    .await?
                else {
                    // 发送者已被删除，跳过该条消息
                    continue;
                };
                senders.insert(message.sender_id, user);
            }
            if let Some(sender) = senders.get(&message.sender_id) {
                items.push(MessageDto::new(message, sender));
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcaster::HandleId,
        clock::FixedClock,
        local_broadcast::LocalRoomBus,
        repository::{MockConversationRepository, MockMessageRepository, MockUserRepository},
    };
    use chrono::Utc;
    use domain::{
        Conversation, ConversationId, ConversationKind, PasswordHash, RepositoryError, UserEmail,
    };

    fn room(name: &str) -> RoomName {
        RoomName::parse(name).expect("room name")
    }

    fn user(name: &str) -> User {
        User::register(
            UserId::from(Uuid::new_v4()),
            Username::parse(name).expect("username"),
            UserEmail::parse(format!("{name}@example.com")).expect("email"),
            PasswordHash::new("hash").expect("hash"),
            Utc::now(),
        )
    }

    fn conversation(name: &str) -> Conversation {
        Conversation::new(
            ConversationId::from(Uuid::new_v4()),
            room(name),
            ConversationKind::Group,
            Utc::now(),
        )
    }

    fn service(
        users: MockUserRepository,
        conversations: MockConversationRepository,
        messages: MockMessageRepository,
        bus: Arc<LocalRoomBus>,
    ) -> ChatService {
        ChatService::new(ChatServiceDependencies {
            user_repository: Arc::new(users),
            conversation_repository: Arc::new(conversations),
            message_repository: Arc::new(messages),
            bus,
            clock: Arc::new(FixedClock(Utc::now())),
        })
    }

    #[tokio::test]
    async fn post_message_persists_then_publishes() {
        let alice = user("alice");
        let general = conversation("general");
        let general_id = general.id;
        let alice_id = alice.id;

        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .withf(|name| name.as_str() == "alice")
            .returning(move |_| Ok(Some(alice.clone())));
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_by_name()
            .returning(move |_| Ok(Some(general.clone())));
        let mut messages = MockMessageRepository::new();
        messages
            .expect_create()
            .times(1)
            .withf(move |m| {
                m.conversation_id == general_id
                    && m.sender_id == alice_id
                    && m.content.as_str() == "hi"
            })
            .returning(|m| Ok(m));

        let bus = Arc::new(LocalRoomBus::default());
        let mut subscription = bus.subscribe(&room("general"), HandleId::new());
        let service = service(users, conversations, messages, bus);

        let event = service
            .post_message(PostMessageRequest {
                room: room("general"),
                username: "alice".to_string(),
                content: "hi".to_string(),
            })
            .await
            .expect("post message");

        assert_eq!(event.sender_username, "alice");
        let received = subscription.recv().await.expect("published event");
        assert_eq!(received.message_body, "hi");
        assert_eq!(received.room_id.as_str(), "general");
    }

    #[tokio::test]
    async fn unknown_room_is_not_persisted_or_published() {
        let alice = user("alice");
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .returning(move |_| Ok(Some(alice.clone())));
        let mut conversations = MockConversationRepository::new();
        conversations.expect_find_by_name().returning(|_| Ok(None));
        let mut messages = MockMessageRepository::new();
        messages.expect_create().never();

        let bus = Arc::new(LocalRoomBus::default());
        let mut subscription = bus.subscribe(&room("ghost"), HandleId::new());
        let service = service(users, conversations, messages, bus);

        let result = service
            .post_message(PostMessageRequest {
                room: room("ghost"),
                username: "alice".to_string(),
                content: "hi".to_string(),
            })
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::ConversationNotFound))
        ));
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn unknown_sender_is_rejected() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_username().returning(|_| Ok(None));
        let mut conversations = MockConversationRepository::new();
        conversations.expect_find_by_name().never();
        let mut messages = MockMessageRepository::new();
        messages.expect_create().never();

        let service = service(users, conversations, messages, Arc::new(LocalRoomBus::default()));
        let result = service
            .post_message(PostMessageRequest {
                room: room("general"),
                username: "mallory".to_string(),
                content: "hi".to_string(),
            })
            .await;

        assert!(matches!(
            result,
            Err(ApplicationError::Domain(DomainError::UserNotFound))
        ));
    }

    #[tokio::test]
    async fn storage_failure_suppresses_broadcast() {
        let alice = user("alice");
        let general = conversation("general");
        let mut users = MockUserRepository::new();
        users
            .expect_find_by_username()
            .returning(move |_| Ok(Some(alice.clone())));
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_by_name()
            .returning(move |_| Ok(Some(general.clone())));
        let mut messages = MockMessageRepository::new();
        messages
            .expect_create()
            .returning(|_| Err(RepositoryError::storage("disk full")));

        let bus = Arc::new(LocalRoomBus::default());
        let mut subscription = bus.subscribe(&room("general"), HandleId::new());
        let service = service(users, conversations, messages, bus);

        let result = service
            .post_message(PostMessageRequest {
                room: room("general"),
                username: "alice".to_string(),
                content: "hi".to_string(),
            })
            .await;

        assert!(matches!(result, Err(ApplicationError::Repository(_))));
        assert!(subscription.try_recv().is_none());
    }

    #[tokio::test]
    async fn history_resolves_senders() {
        let alice = user("alice");
        let general = conversation("general");
        let general_id = general.id;
        let stored = vec![
            Message::new(
                MessageId::from(Uuid::new_v4()),
                general_id,
                alice.id,
                MessageContent::new("first").expect("content"),
                Utc::now(),
            ),
            Message::new(
                MessageId::from(Uuid::new_v4()),
                general_id,
                alice.id,
                MessageContent::new("second").expect("content"),
                Utc::now(),
            ),
        ];

        let mut users = MockUserRepository::new();
        users
            .expect_find_by_id()
            .times(1)
            .returning(move |_| Ok(Some(alice.clone())));
        let mut conversations = MockConversationRepository::new();
        conversations
            .expect_find_by_name()
            .returning(move |_| Ok(Some(general.clone())));
        let mut messages = MockMessageRepository::new();
        messages
            .expect_list_recent()
            .withf(move |id, limit| *id == general_id && *limit == MAX_HISTORY_LIMIT)
            .returning(move |_, _| Ok(stored.clone()));

        let service = service(users, conversations, messages, Arc::new(LocalRoomBus::default()));
        let items = service
            .history(room("general"), Some(500))
            .await
            .expect("history");

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].content, "first");
        assert_eq!(items[1].sender.username, "alice");
    }
}
