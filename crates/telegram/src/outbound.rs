use std::{future::Future, time::Duration};

use {
    teloxide::{
        RequestError,
        payloads::SendMessageSetters,
        prelude::*,
        types::{ChatId, InputFile, ParseMode},
    },
    tracing::warn,
    url::Url,
};

use crate::{
    error::{Error, Result},
    state::AccountStateMap,
};

const RETRY_AFTER_MAX_RETRIES: usize = 4;

/// Outbound message sender for both bot accounts.
pub struct TelegramOutbound {
    pub(crate) accounts: AccountStateMap,
}

impl TelegramOutbound {
    pub fn new(accounts: AccountStateMap) -> Self {
        Self { accounts }
    }

    fn get_bot(&self, account_id: &str) -> Result<Bot> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .get(account_id)
            .map(|s| s.bot.clone())
            .ok_or_else(|| Error::message(format!("unknown account: {account_id}")))
    }

    /// Send a text message, trying HTML first and falling back to plain
    /// text when Telegram rejects the markup.
    pub async fn send_text(&self, account_id: &str, to: &str, text: &str) -> Result<()> {
        let bot = self.get_bot(account_id)?;
        let chat_id = parse_chat_id(to)?;

        match self
            .run_with_retry(account_id, to, "send message (html)", || {
                let req = bot
                    .send_message(chat_id, text)
                    .parse_mode(ParseMode::Html);
                async move { req.await }
            })
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(
                    account_id,
                    chat_id = to,
                    error = %e,
                    "telegram HTML send failed, retrying as plain text"
                );
                self.run_with_retry(account_id, to, "send message (plain)", || {
                    let req = bot.send_message(chat_id, text);
                    async move { req.await }
                })
                .await?;
                Ok(())
            },
        }
    }

    /// Send an audio URL as a voice-note-style message.
    pub async fn send_voice(&self, account_id: &str, to: &str, audio_url: &Url) -> Result<()> {
        let bot = self.get_bot(account_id)?;
        let chat_id = parse_chat_id(to)?;

        self.run_with_retry(account_id, to, "send voice", || {
            let req = bot.send_voice(chat_id, InputFile::url(audio_url.clone()));
            async move { req.await }
        })
        .await?;
        Ok(())
    }

    /// Send an audio URL as a named document attachment.
    pub async fn send_document(
        &self,
        account_id: &str,
        to: &str,
        file_url: &Url,
        file_name: &str,
    ) -> Result<()> {
        let bot = self.get_bot(account_id)?;
        let chat_id = parse_chat_id(to)?;
        let input = InputFile::url(file_url.clone()).file_name(file_name.to_string());

        self.run_with_retry(account_id, to, "send document", || {
            let req = bot.send_document(chat_id, input.clone());
            async move { req.await }
        })
        .await?;
        Ok(())
    }

    /// Run a Telegram request, honoring `RetryAfter` a bounded number of
    /// times before giving up.
    async fn run_with_retry<T, F, Fut>(
        &self,
        account_id: &str,
        to: &str,
        operation: &'static str,
        mut request: F,
    ) -> std::result::Result<T, RequestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, RequestError>>,
    {
        let mut retries = 0usize;

        loop {
            match request().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let Some(wait) = retry_after_duration(&err) else {
                        return Err(err);
                    };

                    if retries >= RETRY_AFTER_MAX_RETRIES {
                        warn!(
                            account_id,
                            chat_id = to,
                            operation,
                            retries,
                            retry_after_secs = wait.as_secs(),
                            "telegram rate limit persisted after retries"
                        );
                        return Err(err);
                    }

                    retries += 1;
                    warn!(
                        account_id,
                        chat_id = to,
                        operation,
                        retries,
                        retry_after_secs = wait.as_secs(),
                        "telegram rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                },
            }
        }
    }
}

fn parse_chat_id(to: &str) -> Result<ChatId> {
    to.parse::<i64>()
        .map(ChatId)
        .map_err(|_| Error::message(format!("invalid chat id: {to}")))
}

fn retry_after_duration(error: &RequestError) -> Option<Duration> {
    match error {
        RequestError::RetryAfter(wait) => Some(wait.duration()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_id_parses_numeric() {
        assert_eq!(parse_chat_id("123456").unwrap(), ChatId(123456));
        assert_eq!(parse_chat_id("-1001234").unwrap(), ChatId(-1001234));
        assert!(parse_chat_id("not-a-number").is_err());
    }
}
