//! Terminal chat platform.
//!
//! Stdin lines become messages in the private chat `console`. Lines
//! starting with `/` are commands, and `!image <path> [caption]` attaches an
//! image. Replies are written to stdout.

use async_trait::async_trait;
use mibo_bus::EventBus;
use mibo_core::{ChatId, MessageId};
use mibo_relay::events::{CommandIssued, MessageArrived, ShutdownRequested};
use mibo_relay::{ChatKind, ChatPlatform, PlatformError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Chat identifier and name of the console conversation.
pub const CONSOLE_CHAT: &str = "console";

/// Writes replies to a terminal or any other writer.
pub struct ConsolePlatform<W> {
    out: Mutex<W>,
    assistant_name: String,
}

impl<W> ConsolePlatform<W> {
    pub fn new(out: W, assistant_name: impl Into<String>) -> Self {
        Self {
            out: Mutex::new(out),
            assistant_name: assistant_name.into(),
        }
    }

    #[cfg(test)]
    async fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

#[async_trait]
impl<W> ChatPlatform for ConsolePlatform<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_text(
        &self,
        chat_id: &ChatId,
        text: &str,
        _reply_to: Option<&MessageId>,
    ) -> Result<(), PlatformError> {
        let line = if chat_id.as_str() == CONSOLE_CHAT {
            format!("{}> {text}\n", self.assistant_name)
        } else {
            format!("[{chat_id}] {}> {text}\n", self.assistant_name)
        };

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| PlatformError::SendFailed {
                chat_id: chat_id.clone(),
                reason: e.to_string(),
            })?;
        out.flush().await.map_err(|e| PlatformError::SendFailed {
            chat_id: chat_id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Turns one input line into a bus event, if it carries anything.
async fn dispatch(bus: &EventBus, line: &str, sender: &str, message_id: MessageId) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    if line.starts_with('/') {
        if let Some(command) =
            CommandIssued::parse(CONSOLE_CHAT, CONSOLE_CHAT, ChatKind::Private, line)
        {
            bus.emit(command).await;
        }
        return;
    }

    let message = match line.strip_prefix("!image ") {
        Some(rest) => {
            let (path, caption) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
            MessageArrived::new(
                CONSOLE_CHAT,
                CONSOLE_CHAT,
                ChatKind::Private,
                message_id,
                sender,
                caption.trim(),
            )
            .with_image(path)
        }
        None => MessageArrived::new(
            CONSOLE_CHAT,
            CONSOLE_CHAT,
            ChatKind::Private,
            message_id,
            sender,
            line,
        ),
    };
    bus.emit(message).await;
}

/// Reads lines until end of input, then requests shutdown.
pub async fn read_lines<R>(bus: EventBus, reader: R, sender: String)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut message_id = 0_u64;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                message_id += 1;
                dispatch(&bus, &line, &sender, MessageId::new(message_id)).await;
            }
            Ok(None) => {
                info!("console input closed");
                break;
            }
            Err(e) => {
                debug!(error = %e, "console read failed");
                break;
            }
        }
    }
    bus.emit(ShutdownRequested::new("console input closed")).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};
    use std::time::Duration;

    fn record<E: mibo_bus::Event + Clone>(bus: &EventBus) -> Arc<StdMutex<Vec<E>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.register(move |event: Arc<E>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().expect("lock").push((*event).clone());
                Ok(())
            }
        });
        seen
    }

    #[tokio::test(start_paused = true)]
    async fn lines_become_events() {
        let bus = EventBus::new();
        let messages = record::<MessageArrived>(&bus);
        let commands = record::<CommandIssued>(&bus);
        let shutdowns = record::<ShutdownRequested>(&bus);

        let input: &[u8] = b"hello there\n\n/chance 50\n!image cat.png look at this\n";
        read_lines(bus.clone(), input, "ann".to_string()).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        let messages = messages.lock().expect("lock").clone();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text.as_deref(), Some("hello there"));
        assert_eq!(messages[0].sender, "ann");
        assert_eq!(messages[0].chat_kind, ChatKind::Private);
        assert_eq!(messages[1].images, ["cat.png"]);
        assert_eq!(messages[1].text.as_deref(), Some("look at this"));
        assert_ne!(messages[0].message_id, messages[1].message_id);

        let commands = commands.lock().expect("lock").clone();
        assert_eq!(commands[0].command, "chance");
        assert_eq!(commands[0].args, ["50"]);

        assert_eq!(shutdowns.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn replies_are_written_with_the_assistant_name() {
        let platform = ConsolePlatform::new(Vec::new(), "Mibo");
        platform
            .send_text(&ChatId::from(CONSOLE_CHAT), "hi!", None)
            .await
            .expect("sent");
        platform
            .send_text(&ChatId::from("ops"), "error", None)
            .await
            .expect("sent");

        let written = String::from_utf8(platform.into_inner().await).expect("utf8");
        assert_eq!(written, "Mibo> hi!\n[ops] Mibo> error\n");
    }
}
