mod chat_service;
mod conversation_service;
mod user_service;

pub use chat_service::{
    ChatService, ChatServiceDependencies, PostMessageRequest, DEFAULT_HISTORY_LIMIT,
    MAX_HISTORY_LIMIT,
};
pub use conversation_service::{
    ConversationService, ConversationServiceDependencies, CreateConversationRequest,
};
pub use user_service::{
    AuthenticateUserRequest, ChangePasswordRequest, RegisterUserRequest, UpdateUserRequest,
    UserService, UserServiceDependencies,
};
