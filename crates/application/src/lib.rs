//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务，以及对外部适配器（仓储、密码哈希、
//! 房间广播总线）的抽象。

pub mod broadcaster;
pub mod clock;
pub mod dto;
pub mod error;
pub mod local_broadcast;
pub mod password;
pub mod repository;
pub mod services;

pub use broadcaster::{BusError, CloseReason, HandleId, RoomBus, RoomSubscription, SubscriberSlot};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dto::{ConversationDto, MessageDto, ParticipantDto, UserDto};
pub use error::ApplicationError;
pub use local_broadcast::{LocalRoomBus, DEFAULT_SUBSCRIBER_BUFFER};
pub use password::{PasswordHasher, PasswordHasherError};
pub use repository::{ConversationRepository, MessageRepository, TokenBlacklist, UserRepository};
pub use services::{
    ChatService, ChatServiceDependencies, ConversationService, ConversationServiceDependencies,
    UserService, UserServiceDependencies,
};
