//! Cloud link protocol: JSON actions inside envelopes.
//!
//! Requests look like `{"action":"Login","args":{...}}`; replies carry the
//! reply flag and `{"action":...,"result":...,"code":...}`.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::envelope::{Envelope, Sequence};
use super::rc4;
use super::{Context, Event, Protocol};
use crate::config::LinkConfig;
use crate::error::Result;

pub const CODE_ACTION: u8 = 1;

#[derive(Debug, Serialize)]
struct Request<'a, T> {
    action: &'a str,
    args: T,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct LoginArgs<'a> {
    user: &'a str,
    password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PingArgs {
    time: u64,
}

#[derive(Debug, Deserialize)]
pub struct Response {
    pub action: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub code: i64,
}

pub struct LinkProtocol {
    user: String,
    password: String,
    seq: Sequence,
}

impl LinkProtocol {
    pub fn new(config: &LinkConfig) -> Self {
        LinkProtocol {
            user: config.user.clone(),
            password: config.password.clone(),
            seq: Sequence::default(),
        }
    }

    /// An action request envelope, ready to send.
    pub fn request<T: Serialize>(&mut self, action: &str, args: T) -> Result<Vec<u8>> {
        let body = serde_json::to_vec(&Request { action, args })?;
        Envelope::request(CODE_ACTION, self.seq.next(), body).encode()
    }

    fn on_reply(&self, env: &Envelope) -> Result<Event> {
        let resp: Response = serde_json::from_slice(&env.payload)?;
        let event = match resp.action.to_ascii_lowercase().as_str() {
            "login" if env.is_error() => Event::LoginRejected {
                reason: match &resp.result {
                    Value::String(s) => s.clone(),
                    Value::Null => format!("code {}", resp.code),
                    other => other.to_string(),
                },
            },
            "login" => Event::LoggedIn {
                key: resp.result["key"].as_str().map(str::to_string),
            },
            "ping" if env.is_error() => {
                warn!("ping rejected: {}", resp.result);
                Event::Ignored
            }
            "ping" => Event::Pong {
                echo_ms: resp.result["Time"].as_u64(),
                server_time: resp.result["ServerTime"].as_u64(),
            },
            _ => Event::Other {
                route: resp.action,
                body: env.payload.clone(),
            },
        };
        Ok(event)
    }
}

/// The login password: the timestamp encrypted with the stored password,
/// then the plain timestamp, both as uppercase hex.
pub fn login_password(password: &str, timestamp: u64) -> Result<String> {
    let ts = timestamp.to_le_bytes();
    let cipher = rc4::crypt(password.as_bytes(), &ts)?;
    Ok(format!("{}{}", rc4::to_hex(&cipher), rc4::to_hex(&ts)))
}

impl Protocol for LinkProtocol {
    fn login(&mut self, ctx: &Context) -> Result<Option<Vec<u8>>> {
        let user = self.user.clone();
        let args = LoginArgs {
            user: &user,
            password: login_password(&self.password, ctx.wall_ms)?,
        };
        let frame = self.request("Login", args)?;
        Ok(Some(frame))
    }

    fn ping(&mut self, ctx: &Context) -> Result<Vec<u8>> {
        self.request(
            "Ping",
            PingArgs {
                time: ctx.uptime_ms,
            },
        )
    }

    fn decode(&mut self, buf: &[u8]) -> Result<Option<(Event, usize)>> {
        let Some((env, used)) = Envelope::decode(buf)? else {
            return Ok(None);
        };
        if env.code != CODE_ACTION {
            debug!("link: code {} ignored", env.code);
            return Ok(Some((Event::Ignored, used)));
        }
        let event = if env.is_reply() {
            self.on_reply(&env)
        } else {
            // server-initiated action
            serde_json::from_slice::<Response>(&env.payload)
                .map(|resp| Event::Other {
                    route: resp.action,
                    body: env.payload.clone(),
                })
                .map_err(Into::into)
        };
        match event {
            Ok(event) => Ok(Some((event, used))),
            Err(e) => {
                warn!("link: unreadable message #{}: {}", env.seq, e);
                Ok(Some((Event::Ignored, used)))
            }
        }
    }
}
