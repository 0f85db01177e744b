//! Operator channels that answer assistance requests.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::{AssistanceId, AssistanceRequest};

/// Delay before a headless operator assumes a blocked screen was passed.
pub const DEFAULT_AUTO_RESOLVE_DELAY: Duration = Duration::from_secs(2);

/// Operator's answer to one request.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorResponse {
    /// The screen was passed. Optional payload for the caller.
    Confirmed(Option<serde_json::Value>),
    Declined,
}

/// Someone (or something) able to get past a blocked screen.
///
/// `handle` may take as long as it likes; the coordinator stops waiting when
/// the session times out and drops the future.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn handle(&self, id: &AssistanceId, request: &AssistanceRequest) -> OperatorResponse;
}

/// Prompts on the terminal and waits for Enter or `cancel`.
///
/// Input is read by one long-lived task that forwards lines over a channel.
/// A read in progress cannot be cancelled, so when the coordinator drops a
/// timed-out `handle` the next line still reaches the next request instead
/// of vanishing with an orphaned reader.
pub struct ConsoleOperator {
    answers: Mutex<mpsc::Receiver<String>>,
}

impl ConsoleOperator {
    /// Operator reading answers from stdin. Must be called inside a runtime.
    pub fn stdin() -> Self {
        Self::with_input(tokio::io::stdin())
    }

    /// Operator reading answers line by line from `input`.
    pub fn with_input<R>(input: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut lines = BufReader::new(input).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        debug!("Operator input closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read operator input: {}", e);
                        break;
                    }
                }
            }
        });
        Self {
            answers: Mutex::new(rx),
        }
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn handle(&self, id: &AssistanceId, request: &AssistanceRequest) -> OperatorResponse {
        let mut answers = self.answers.lock().await;
        // Lines typed before this prompt answered an earlier, expired one.
        while let Ok(stale) = answers.try_recv() {
            debug!(line = %stale, "Discarding answer to an expired request");
        }

        let mut prompt = format!(
            "\n== Assistance needed ({}) ==\nReason:   {}\nAction:   {}\nTimeout:  {}s\n",
            id,
            request.reason,
            request.expected_action,
            request.timeout.as_secs()
        );
        for (key, description) in &request.required_data {
            prompt.push_str(&format!("Provide:  {key} ({description})\n"));
        }
        prompt.push_str("Press Enter when done (optionally type a value first), or type 'cancel': ");

        let mut stderr = tokio::io::stderr();
        if let Err(e) = stderr.write_all(prompt.as_bytes()).await {
            warn!("Failed to write assistance prompt: {}", e);
        }
        let _ = stderr.flush().await;

        match answers.recv().await {
            Some(line) => parse_console_answer(&line),
            None => {
                warn!("Operator input closed, declining assistance request");
                OperatorResponse::Declined
            }
        }
    }
}

fn parse_console_answer(line: &str) -> OperatorResponse {
    let answer = line.trim();
    if answer.eq_ignore_ascii_case("cancel") {
        OperatorResponse::Declined
    } else if answer.is_empty() {
        OperatorResponse::Confirmed(None)
    } else {
        OperatorResponse::Confirmed(Some(serde_json::json!({ "input": answer })))
    }
}

/// Operator for unattended runs.
///
/// Declines every request unless `auto_resolve` is set, in which case it
/// waits that long and reports the screen as passed, tagged `auto_completed`.
pub struct HeadlessOperator {
    pub auto_resolve: Option<Duration>,
}

impl HeadlessOperator {
    pub fn declining() -> Self {
        Self { auto_resolve: None }
    }

    pub fn assume_resolved(after: Duration) -> Self {
        Self {
            auto_resolve: Some(after),
        }
    }
}

#[async_trait]
impl Operator for HeadlessOperator {
    async fn handle(&self, id: &AssistanceId, request: &AssistanceRequest) -> OperatorResponse {
        match self.auto_resolve {
            None => {
                info!(id = %id, reason = %request.reason, "No operator available, declining");
                OperatorResponse::Declined
            }
            Some(delay) => {
                tokio::time::sleep(delay).await;
                warn!(id = %id, reason = %request.reason, "Assuming blocked screen was passed");
                OperatorResponse::Confirmed(Some(serde_json::json!({ "auto_completed": true })))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AssistanceRequest {
        AssistanceRequest::new("captcha", "Enter the code", Duration::from_secs(60))
    }

    #[test]
    fn console_answers() {
        assert_eq!(parse_console_answer(""), OperatorResponse::Confirmed(None));
        assert_eq!(parse_console_answer("  CANCEL \n"), OperatorResponse::Declined);
        assert_eq!(
            parse_console_answer("4821"),
            OperatorResponse::Confirmed(Some(serde_json::json!({"input": "4821"})))
        );
    }

    #[tokio::test]
    async fn console_answer_after_timeout_reaches_next_request() {
        let (mut keyboard, input) = tokio::io::duplex(64);
        let operator = ConsoleOperator::with_input(input);

        let first = tokio::time::timeout(
            Duration::from_millis(30),
            operator.handle(&AssistanceId::new(), &request()),
        )
        .await;
        assert!(first.is_err());

        let id = AssistanceId::new();
        let req = request();
        let second = operator.handle(&id, &req);
        let typing = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            keyboard.write_all(b"4821\n").await.unwrap();
        };
        let (answer, ()) = tokio::join!(second, typing);
        assert_eq!(
            answer,
            OperatorResponse::Confirmed(Some(serde_json::json!({"input": "4821"})))
        );
    }

    #[tokio::test]
    async fn console_discards_lines_typed_between_requests() {
        let (mut keyboard, input) = tokio::io::duplex(64);
        let operator = ConsoleOperator::with_input(input);

        keyboard.write_all(b"late\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let id = AssistanceId::new();
        let req = request();
        let answer = operator.handle(&id, &req);
        let typing = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            keyboard.write_all(b"cancel\n").await.unwrap();
        };
        let (answer, ()) = tokio::join!(answer, typing);
        assert_eq!(answer, OperatorResponse::Declined);
    }

    #[tokio::test]
    async fn console_declines_when_input_closes() {
        let (keyboard, input) = tokio::io::duplex(64);
        let operator = ConsoleOperator::with_input(input);
        drop(keyboard);

        let answer = operator.handle(&AssistanceId::new(), &request()).await;
        assert_eq!(answer, OperatorResponse::Declined);
    }

    #[tokio::test]
    async fn headless_declines_by_default() {
        let operator = HeadlessOperator::declining();
        let answer = operator.handle(&AssistanceId::new(), &request()).await;
        assert_eq!(answer, OperatorResponse::Declined);
    }

    #[tokio::test]
    async fn headless_opt_in_tags_auto_completed() {
        let operator = HeadlessOperator::assume_resolved(Duration::from_millis(5));
        let answer = operator.handle(&AssistanceId::new(), &request()).await;
        assert_eq!(
            answer,
            OperatorResponse::Confirmed(Some(serde_json::json!({"auto_completed": true})))
        );
    }
}
