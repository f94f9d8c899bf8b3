use std::future::Future;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::mcp_api::{parse_error, Dispatcher};

/// Serve newline-delimited JSON-RPC messages until the reader hits EOF or
/// `shutdown` resolves. Each request produces exactly one response line.
pub async fn serve_lines<R, W, S>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
    shutdown: S,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read from stdin")?,
            () = &mut shutdown => {
                info!("Shutdown requested, closing stdio transport");
                break;
            }
        };

        let Some(line) = line else {
            debug!("stdin closed");
            break;
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(trimmed) {
            Ok(message) => dispatcher.handle(message).await,
            Err(err) => parse_error(err.to_string()),
        };

        let mut encoded = serde_json::to_vec(&response).context("failed to encode response")?;
        encoded.push(b'\n');
        writer
            .write_all(&encoded)
            .await
            .context("failed to write to stdout")?;
        writer.flush().await.context("failed to flush stdout")?;
    }

    Ok(())
}

pub async fn serve(dispatcher: &Dispatcher, shutdown: impl Future<Output = ()>) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    info!("Diamond pricing MCP server listening on stdio");
    serve_lines(dispatcher, stdin, stdout, shutdown).await
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use serde_json::json;

    use super::*;
    use crate::mcp_api::testing::sample_dispatcher;

    async fn run(input: &str) -> Vec<Value> {
        let dispatcher = sample_dispatcher();
        let mut output = Vec::new();
        serve_lines(&dispatcher, input.as_bytes(), &mut output, pending())
            .await
            .expect("serve");

        String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("response line"))
            .collect()
    }

    #[tokio::test]
    async fn answers_each_line_and_skips_blanks() {
        let responses = run(concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            "\n",
            "   \n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"tools/list\"}\n",
        ))
        .await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[1]["id"], 2);
        assert_eq!(responses[1]["result"]["tools"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn malformed_line_yields_parse_error_and_loop_continues() {
        let responses = run("{oops\n{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n").await;

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[0]["error"]["code"], -32700);
        assert_eq!(responses[0]["error"]["message"], "Parse error");
        assert!(responses[0]["error"]["data"].is_string());
        assert_eq!(responses[1]["result"], json!({}));
    }

    #[tokio::test]
    async fn final_line_without_newline_is_served() {
        let responses = run("{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"ping\"}").await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 3);
    }

    #[tokio::test]
    async fn shutdown_stops_before_reading() {
        let dispatcher = sample_dispatcher();
        let mut output = Vec::new();
        let (_tx, rx) = tokio::io::duplex(64);
        let reader = tokio::io::BufReader::new(rx);

        serve_lines(&dispatcher, reader, &mut output, async {})
            .await
            .expect("serve");
        assert!(output.is_empty());
    }
}
