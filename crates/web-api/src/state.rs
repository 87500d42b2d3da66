use std::sync::Arc;

use application::{
    ChatService, ChatServiceDependencies, Clock, ConversationService,
    ConversationServiceDependencies, RoomBus, SystemClock, TokenBlacklist, UserService,
    UserServiceDependencies,
};
use config::{JwtConfig, RelayConfig};
use infrastructure::Infrastructure;

use crate::{ws_connection::ConnectionGauge, JwtService};

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub chat_service: Arc<ChatService>,
    pub conversation_service: Arc<ConversationService>,
    pub bus: Arc<dyn RoomBus>,
    pub jwt_service: Arc<JwtService>,
    pub token_blacklist: Arc<dyn TokenBlacklist>,
    pub relay: RelayConfig,
    pub connections: Arc<ConnectionGauge>,
}

impl AppState {
    /// 基于已连接的基础设施组装全部用例服务
    pub fn new(infrastructure: Infrastructure, jwt: JwtConfig, relay: RelayConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let user_service = Arc::new(UserService::new(UserServiceDependencies {
            user_repository: infrastructure.user_repository.clone(),
            password_hasher: infrastructure.password_hasher.clone(),
            clock: clock.clone(),
        }));
        let chat_service = Arc::new(ChatService::new(ChatServiceDependencies {
            user_repository: infrastructure.user_repository.clone(),
            conversation_repository: infrastructure.conversation_repository.clone(),
            message_repository: infrastructure.message_repository.clone(),
            bus: infrastructure.bus.clone(),
            clock: clock.clone(),
        }));
        let conversation_service =
            Arc::new(ConversationService::new(ConversationServiceDependencies {
                conversation_repository: infrastructure.conversation_repository.clone(),
                message_repository: infrastructure.message_repository.clone(),
                user_repository: infrastructure.user_repository.clone(),
                clock,
            }));

        Self {
            user_service,
            chat_service,
            conversation_service,
            bus: infrastructure.bus,
            jwt_service: Arc::new(JwtService::new(jwt)),
            token_blacklist: infrastructure.token_blacklist,
            relay,
            connections: Arc::new(ConnectionGauge::new()),
        }
    }
}
