// One user's chat session: the active chat, its displayed turns and the
// cumulative score, plus the streaming exchange that feeds them.
//
// Exchange sequence for `send_message`:
// 1. Snapshot the displayed turns as history, then show the user turn
// 2. Create the chat on the first message of a session
// 3. Persist the user turn
// 4. Show an empty model turn and stream the relay body into it
// 5. On end of stream: bump the score if a tag was found, persist the
//    cleaned model turn
// 6. On any relay or store failure: keep the partial text, show the apology
//    turn, leave the score alone

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use dukkho_core::db::{Chat, Database};
use dukkho_core::protocol::{Role, Turn};
use dukkho_core::score::{accumulate, CompletedResponse, ResponseAccumulator};

use crate::error::ClientError;
use crate::relay_client::RelayClient;
use crate::user::UserContext;

/// Shown (never persisted) when an exchange fails.
pub const APOLOGY: &str = "দুঃখিত, আমি একটু ব্যস্ত আছি। পরে আবার চেষ্টা করো।";

const TITLE_CHARS: usize = 30;

/// Progress of an exchange, for whatever is rendering the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ChatCreated { id: String, title: String },
    /// Current display text of the model turn being streamed.
    Display(String),
    Completed {
        text: String,
        score: Option<u64>,
        total: u64,
    },
    Failed { partial: String, error: String },
}

/// Outcome of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exchange {
    /// Blank input; nothing was sent.
    Ignored,
    Completed {
        text: String,
        score: Option<u64>,
        total: u64,
    },
    Failed { partial: String, error: String },
}

pub struct ChatSession {
    user: UserContext,
    db: Arc<Database>,
    relay: RelayClient,
    active_chat: Option<String>,
    messages: Vec<Turn>,
    score: u64,
}

impl ChatSession {
    pub fn new(user: UserContext, db: Arc<Database>, relay: RelayClient) -> Self {
        Self {
            user,
            db,
            relay,
            active_chat: None,
            messages: Vec::new(),
            score: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        self.user.user_id()
    }

    pub fn active_chat(&self) -> Option<&str> {
        self.active_chat.as_deref()
    }

    /// Turns currently displayed, oldest first.
    pub fn messages(&self) -> &[Turn] {
        &self.messages
    }

    /// Cumulative score of the active chat.
    pub fn score(&self) -> u64 {
        self.score
    }

    /// Send one message and stream the reply.
    ///
    /// Every failure during the exchange, relay or store, ends in
    /// `Exchange::Failed` with the apology turn shown.
    pub async fn send_message(
        &mut self,
        input: &str,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<Exchange, ClientError> {
        if input.trim().is_empty() {
            return Ok(Exchange::Ignored);
        }

        let history = self.messages.clone();
        self.messages.push(Turn::user(input));

        match self.exchange(&history, input, events).await {
            Ok(CompletedResponse { text, score }) => {
                let _ = events
                    .send(SessionEvent::Completed {
                        text: text.clone(),
                        score,
                        total: self.score,
                    })
                    .await;
                Ok(Exchange::Completed {
                    text,
                    score,
                    total: self.score,
                })
            }
            Err(err) => {
                warn!(chat_id = ?self.active_chat, error = %err, "exchange failed");
                // The user turn is last unless the reply placeholder was shown.
                let partial = match self.messages.last() {
                    Some(turn) if turn.role == Role::Model => turn.text.clone(),
                    _ => String::new(),
                };
                if partial.is_empty() && self.messages.last().is_some_and(|t| t.role == Role::Model) {
                    self.messages.pop();
                }
                self.messages.push(Turn::model(APOLOGY));

                let error = err.to_string();
                let _ = events
                    .send(SessionEvent::Failed {
                        partial: partial.clone(),
                        error: error.clone(),
                    })
                    .await;
                Ok(Exchange::Failed { partial, error })
            }
        }
    }

    /// Persist the user turn, stream the reply and persist its outcome. The
    /// local score only moves once the stored one has.
    async fn exchange(
        &mut self,
        history: &[Turn],
        message: &str,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<CompletedResponse, ClientError> {
        let chat_id = match self.active_chat.clone() {
            Some(id) => id,
            None => {
                let title = chat_title(message.trim());
                let id = self.db.create_chat(self.user.user_id(), &title)?;
                info!(chat_id = %id, %title, "created chat");
                self.active_chat = Some(id.clone());
                self.score = 0;
                let _ = events
                    .send(SessionEvent::ChatCreated {
                        id: id.clone(),
                        title,
                    })
                    .await;
                id
            }
        };
        self.db.add_message(&chat_id, Role::User, message)?;

        self.messages.push(Turn::model(String::new()));
        let mut accumulator = ResponseAccumulator::new();
        self.stream_reply(history, message, &mut accumulator, events).await?;

        let completed = accumulator.finish();
        self.set_reply_text(&completed.text);

        if completed.score.is_some() {
            let total = accumulate(self.score, completed.score);
            self.db.update_chat_score(&chat_id, total)?;
            self.score = total;
            info!(%chat_id, turn_score = ?completed.score, total, "score updated");
        } else {
            info!(%chat_id, "reply carried no score tag");
        }
        self.db.add_message(&chat_id, Role::Model, &completed.text)?;

        Ok(completed)
    }

    async fn stream_reply(
        &mut self,
        history: &[Turn],
        message: &str,
        accumulator: &mut ResponseAccumulator,
        events: &mpsc::Sender<SessionEvent>,
    ) -> Result<(), ClientError> {
        let response = self.relay.open(history, message).await?;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport(e.to_string()))?;
            let display = accumulator.push(&chunk).to_string();
            self.set_reply_text(&display);
            let _ = events.send(SessionEvent::Display(display)).await;
        }
        Ok(())
    }

    fn set_reply_text(&mut self, text: &str) {
        if let Some(last) = self.messages.last_mut() {
            last.text = text.to_string();
        }
    }

    /// Forget the active chat; the next message starts a new one.
    pub fn new_chat(&mut self) {
        self.active_chat = None;
        self.messages.clear();
        self.score = 0;
    }

    /// Make a stored chat active, loading its turns and score.
    pub fn select_chat(&mut self, chat_id: &str) -> Result<(), ClientError> {
        let chat = self.owned_chat(chat_id)?;
        let messages = self.db.chat_messages(&chat.id)?;
        self.messages = messages.into_iter().map(Turn::from).collect();
        self.score = chat.score;
        self.active_chat = Some(chat.id);
        Ok(())
    }

    /// The user's chats, pinned first, then newest first.
    pub fn list_chats(&self) -> Result<Vec<Chat>, ClientError> {
        Ok(self.db.user_chats(self.user.user_id())?)
    }

    pub fn delete_chat(&mut self, chat_id: &str) -> Result<(), ClientError> {
        let chat = self.owned_chat(chat_id)?;
        self.db.delete_chat(&chat.id)?;
        info!(chat_id, "deleted chat");
        if self.active_chat.as_deref() == Some(chat_id) {
            self.new_chat();
        }
        Ok(())
    }

    pub fn rename_chat(&self, chat_id: &str, title: &str) -> Result<(), ClientError> {
        let chat = self.owned_chat(chat_id)?;
        self.db.update_chat_title(&chat.id, title)?;
        Ok(())
    }

    /// Flip the pinned flag; returns the new value.
    pub fn toggle_pin(&self, chat_id: &str) -> Result<bool, ClientError> {
        let chat = self.owned_chat(chat_id)?;
        Ok(self.db.toggle_chat_pin(&chat.id)?)
    }

    pub fn sign_out(self) {
        self.user.sign_out();
    }

    fn owned_chat(&self, chat_id: &str) -> Result<Chat, ClientError> {
        self.db
            .get_chat(chat_id)?
            .filter(|chat| chat.user_id == self.user.user_id())
            .ok_or_else(|| ClientError::ChatNotFound(chat_id.to_string()))
    }
}

/// First 30 characters of the opening message, with `...` when cut.
fn chat_title(message: &str) -> String {
    let mut chars = message.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
