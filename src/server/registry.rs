use dashmap::DashMap;
use std::collections::VecDeque;

use crate::clients::ai::ChatTurn;
use crate::db::enums::AiProvider;

/// Most recent turns kept per (bot, chat) conversation.
const MAX_HISTORY_TURNS: usize = 10;

/// Everything the in-process runner needs to serve one bot. Credentials are
/// held decrypted in memory only; they never leave this process.
#[derive(Debug, Clone)]
pub struct LiveBot {
    pub bot_id: i32,
    pub platform_token: String,
    pub ai_provider: AiProvider,
    pub ai_token: String,
    pub ai_model: String,
    pub system_prompt: String,
}

/// Registry of bots hosted by the in-process runner, plus their bounded
/// conversation histories. Eviction and concurrency live here rather than in
/// the runner itself so there is exactly one owner of this state.
#[derive(Default)]
pub struct BotRegistry {
    live: DashMap<i32, LiveBot>,
    conversations: DashMap<(i32, i64), VecDeque<ChatTurn>>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bot: LiveBot) {
        self.live.insert(bot.bot_id, bot);
    }

    pub fn deregister(&self, bot_id: i32) {
        self.live.remove(&bot_id);
        self.conversations.retain(|(id, _), _| *id != bot_id);
    }

    pub fn get(&self, bot_id: i32) -> Option<LiveBot> {
        self.live.get(&bot_id).map(|b| b.clone())
    }

    pub fn is_registered(&self, bot_id: i32) -> bool {
        self.live.contains_key(&bot_id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Appends a turn to the ring buffer for (bot, chat), evicting the oldest
    /// once the cap is reached.
    pub fn push_turn(&self, bot_id: i32, chat_id: i64, turn: ChatTurn) {
        let mut history = self.conversations.entry((bot_id, chat_id)).or_default();
        if history.len() >= MAX_HISTORY_TURNS {
            history.pop_front();
        }
        history.push_back(turn);
    }

    pub fn history(&self, bot_id: i32, chat_id: i64) -> Vec<ChatTurn> {
        self.conversations
            .get(&(bot_id, chat_id))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live_bot(id: i32) -> LiveBot {
        LiveBot {
            bot_id: id,
            platform_token: "tg-token".to_string(),
            ai_provider: AiProvider::OpenAi,
            ai_token: "ai-token".to_string(),
            ai_model: "gpt-4o-mini".to_string(),
            system_prompt: "be helpful".to_string(),
        }
    }

    #[test]
    fn register_and_deregister() {
        let registry = BotRegistry::new();
        registry.register(live_bot(1));
        assert!(registry.is_registered(1));

        registry.push_turn(1, 42, ChatTurn::user("hi"));
        registry.deregister(1);
        assert!(!registry.is_registered(1));
        assert!(registry.history(1, 42).is_empty());
    }

    #[test]
    fn history_is_bounded_and_ordered() {
        let registry = BotRegistry::new();
        registry.register(live_bot(1));
        for i in 0..15 {
            registry.push_turn(1, 42, ChatTurn::user(format!("msg {i}")));
        }

        let history = registry.history(1, 42);
        assert_eq!(history.len(), MAX_HISTORY_TURNS);
        assert_eq!(history.first().unwrap().content, "msg 5");
        assert_eq!(history.last().unwrap().content, "msg 14");
    }

    #[test]
    fn conversations_are_keyed_per_chat() {
        let registry = BotRegistry::new();
        registry.push_turn(1, 1, ChatTurn::user("a"));
        registry.push_turn(1, 2, ChatTurn::user("b"));
        assert_eq!(registry.history(1, 1).len(), 1);
        assert_eq!(registry.history(1, 2).len(), 1);
    }
}
