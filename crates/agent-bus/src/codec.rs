//! Line-delimited JSON framing for transport peers
//!
//! Each line a peer writes is either a command object tagged by `"op"` or
//! any other JSON value, which is broadcast verbatim. The bus writes every
//! delivered [`BusMessage`] to the peer as one JSON line.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::{BusMessage, Result, WeakBus};

/// Request from a transport peer
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Send {
        #[serde(default)]
        data: Value,
    },
    SendTo {
        to: String,
        #[serde(default)]
        data: Value,
    },
    Subscribe,
    SubscribeTo {
        sender: String,
    },
    SubscribeToExclusively {
        sender: String,
    },
    Unsubscribe,
    UnsubscribeFrom {
        sender: String,
    },
    UnsubscribeFromAll,
}

/// One decoded line
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Command(Command),
    Payload(Value),
}

/// Decode one line. Blank lines yield `None`.
pub fn decode_line(line: &str) -> Result<Option<Inbound>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Encode a message as one newline-terminated JSON line
pub fn encode_message(message: &BusMessage) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Act on a decoded line as agent `agent`
pub(crate) fn dispatch(bus: &crate::Bus, agent: &str, inbound: Inbound) {
    match inbound {
        Inbound::Payload(data) => {
            bus.send(agent, data);
        }
        Inbound::Command(command) => match command {
            Command::Send { data } => {
                bus.send(agent, data);
            }
            Command::SendTo { to, data } => {
                bus.send_to(agent, &to, data);
            }
            Command::Subscribe => bus.subscribe(agent),
            Command::SubscribeTo { sender } => bus.subscribe_to(agent, &sender),
            Command::SubscribeToExclusively { sender } => {
                bus.subscribe_to_exclusively(agent, &sender)
            }
            Command::Unsubscribe => bus.unsubscribe(agent),
            Command::UnsubscribeFrom { sender } => bus.unsubscribe_from(agent, &sender),
            Command::UnsubscribeFromAll => bus.unsubscribe_from_all(agent),
        },
    }
}

/// Read lines from a peer until EOF and publish them as `agent`
pub(crate) async fn read_frames<R>(reader: R, bus: WeakBus, agent: String)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Read error from {}: {}", agent, e);
                break;
            }
        };

        let inbound = match decode_line(&line) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Skipping malformed line from {}: {}", agent, e);
                continue;
            }
        };

        let Some(bus) = bus.upgrade() else {
            break;
        };
        dispatch(&bus, &agent, inbound);
    }
    tracing::debug!("Input stream of {} closed", agent);
}

/// Write every queued message to a peer until the queue or the peer closes
pub(crate) async fn write_frames<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<BusMessage>,
    agent: String,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let line = match encode_message(&message) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to encode message {} for {}: {}", message.id, agent, e);
                continue;
            }
        };
        let written = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::debug!("Output stream of {} closed: {}", agent, e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_commands() {
        assert_eq!(
            decode_line(r#"{"op":"subscribe"}"#).unwrap(),
            Some(Inbound::Command(Command::Subscribe))
        );
        assert_eq!(
            decode_line(r#"{"op":"send_to","to":"viewer","data":{"page":2}}"#).unwrap(),
            Some(Inbound::Command(Command::SendTo {
                to: "viewer".into(),
                data: json!({"page": 2}),
            }))
        );
        assert_eq!(
            decode_line(r#"{"op":"subscribe_to_exclusively","sender":"x"}"#).unwrap(),
            Some(Inbound::Command(Command::SubscribeToExclusively {
                sender: "x".into()
            }))
        );
        assert_eq!(
            decode_line(r#"{"op":"send"}"#).unwrap(),
            Some(Inbound::Command(Command::Send { data: Value::Null }))
        );
    }

    #[test]
    fn test_decode_plain_payload() {
        assert_eq!(
            decode_line(r#"  {"title":"Annotations","count":3}  "#).unwrap(),
            Some(Inbound::Payload(json!({"title": "Annotations", "count": 3})))
        );
        assert_eq!(
            decode_line("42").unwrap(),
            Some(Inbound::Payload(json!(42)))
        );
    }

    #[test]
    fn test_unknown_op_is_payload() {
        let decoded = decode_line(r#"{"op":"teleport","where":"mars"}"#).unwrap();
        assert_eq!(
            decoded,
            Some(Inbound::Payload(json!({"op": "teleport", "where": "mars"})))
        );
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert_eq!(decode_line("   ").unwrap(), None);
        assert!(decode_line("{not json").is_err());
    }

    #[test]
    fn test_encode_is_single_line() {
        let message = BusMessage::direct("a", "b", json!({"text": "line one\nline two"}));
        let line = encode_message(&message).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let decoded: BusMessage = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(decoded, message);
    }

    #[tokio::test]
    async fn test_write_frames_writes_lines() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (client, mut server) = tokio::io::duplex(4096);

        tx.send(BusMessage::broadcast("a", json!(1))).unwrap();
        tx.send(BusMessage::broadcast("a", json!(2))).unwrap();
        drop(tx);

        write_frames(client, rx, "peer".to_string()).await;

        let mut output = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut server, &mut output)
            .await
            .unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: BusMessage = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.data, json!(2));
    }
}
