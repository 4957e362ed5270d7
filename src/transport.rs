//! JSON-lines transport.
//!
//! One request per input line: a `Command` object with an optional `"id"`
//! that is copied into its response. Commands for the same database run in
//! arrival order; commands for different databases run concurrently, so
//! responses may come back out of input order.

use crate::dispatcher::{Command, Dispatcher, Response};
use crate::engine::Engine;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Request = (Option<Value>, Command);

/// Serves requests from `input` until EOF, then waits for every accepted
/// command to answer. Returns the output sink once all responses are written.
pub async fn serve<E, R, W>(dispatcher: Arc<Dispatcher<E>>, input: R, output: W) -> Result<W>
where
    E: Engine,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_replies(reply_rx, output));

    let mut lanes: HashMap<String, mpsc::UnboundedSender<Request>> = HashMap::new();
    let mut lane_tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let (id, parsed) = parse_request(&line);
        let command = match parsed {
            Ok(command) => command,
            Err(e) => {
                let invalid = Response::Error {
                    code: "invalid".to_string(),
                    message: e.to_string(),
                };
                let _ = reply_tx.send(encode_reply(id, &invalid));
                continue;
            }
        };

        let lane = command.database().unwrap_or_default().to_string();
        let sender = lanes.entry(lane).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            lane_tasks.push(tokio::spawn(run_lane(
                Arc::clone(&dispatcher),
                rx,
                reply_tx.clone(),
            )));
            tx
        });
        let _ = sender.send((id, command));
    }

    drop(lanes);
    for task in lane_tasks {
        task.await?;
    }
    drop(reply_tx);
    writer.await?
}

async fn run_lane<E: Engine>(
    dispatcher: Arc<Dispatcher<E>>,
    mut requests: mpsc::UnboundedReceiver<Request>,
    replies: mpsc::UnboundedSender<Value>,
) {
    while let Some((id, command)) = requests.recv().await {
        let response = dispatcher.dispatch(command).await;
        let _ = replies.send(encode_reply(id, &response));
    }
}

async fn write_replies<W>(mut replies: mpsc::UnboundedReceiver<Value>, mut output: W) -> Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = replies.recv().await {
        let mut encoded = reply.to_string();
        encoded.push('\n');
        output.write_all(encoded.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(output)
}

fn parse_request(line: &str) -> (Option<Value>, serde_json::Result<Command>) {
    let mut value = match serde_json::from_str::<Value>(line) {
        Ok(value) => value,
        Err(e) => return (None, Err(e)),
    };
    let id = value.as_object_mut().and_then(|obj| obj.remove("id"));
    (id, serde_json::from_value(value))
}

fn encode_reply(id: Option<Value>, response: &Response) -> Value {
    let mut value = serde_json::to_value(response).unwrap_or_else(|e| {
        serde_json::json!({ "status": "error", "code": "encode", "message": e.to_string() })
    });
    if let (Some(id), Some(obj)) = (id, value.as_object_mut()) {
        obj.insert("id".to_string(), id);
    }
    value
}
