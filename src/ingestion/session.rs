//! One ingestion client session.
//!
//! ```text
//! S: ["version", "1"]
//! C: ["authenticate", user, password]
//! S: ["ok"] | ["error", reason] + close
//! C: ["log", group, category, data]      (no reply)
//! C: ["ping"]  →  S: ["pong"]
//! ```

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::accounts::AccountsDatabase;
use crate::ingestion::state::IngestionState;
use crate::protocol::{read_array, write_array, ProtocolError};

pub const PROTOCOL_VERSION: &str = "1";
pub const INVALID_CREDENTIALS: &str = "The supplied username or password is invalid.";
pub const UNKNOWN_COMMAND: &str = "unknown command";

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed the connection.
    Disconnected,
    /// Authentication failed.
    Rejected,
    /// Client sent something we do not understand.
    ProtocolViolation,
}

pub async fn run_session<S>(
    stream: &mut S,
    accounts: &AccountsDatabase,
    state: &IngestionState,
) -> Result<SessionEnd, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_array(stream, &["version", PROTOCOL_VERSION]).await?;

    let Some(message) = read_array(stream).await? else {
        return Ok(SessionEnd::Disconnected);
    };
    match message.as_slice() {
        [cmd, username, password] if cmd == "authenticate" => {
            if accounts.authenticate(username, password).is_none() {
                state.record_auth_failure();
                debug!(username = %username, "Ingestion client failed to authenticate");
                write_array(stream, &["error", INVALID_CREDENTIALS]).await?;
                return Ok(SessionEnd::Rejected);
            }
            write_array(stream, &["ok"]).await?;
        }
        _ => {
            state.record_auth_failure();
            write_array(stream, &["error", INVALID_CREDENTIALS]).await?;
            return Ok(SessionEnd::Rejected);
        }
    }

    while let Some(message) = read_array(stream).await? {
        match message.as_slice() {
            [cmd, group, category, data] if cmd == "log" => {
                if !state.record_event(group, category, data) {
                    debug!(category = %category, "Event buffer full; dropped oldest event");
                }
            }
            [cmd] if cmd == "ping" => write_array(stream, &["pong"]).await?,
            _ => {
                debug!(command = ?message.first(), "Unknown ingestion command");
                write_array(stream, &["error", UNKNOWN_COMMAND]).await?;
                return Ok(SessionEnd::ProtocolViolation);
            }
        }
    }
    Ok(SessionEnd::Disconnected)
}
