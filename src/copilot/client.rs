//! HTTP client for GitHub login and the Copilot chat API
//!
//! Login uses the OAuth device flow against github.com. The resulting GitHub
//! token is exchanged for a short-lived Copilot token, which authorizes the
//! streaming chat completions and embeddings endpoints.

use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{self, PollClock};
use super::types::*;
use crate::prompts::COPILOT_INSTRUCTIONS;

/// OAuth app id of the Copilot editor plugins
pub const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";

const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_URL: &str = "https://api.github.com/user";
const SESSION_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";
const CHAT_URL: &str = "https://api.githubcopilot.com/chat/completions";
const EMBEDDINGS_URL: &str = "https://api.githubcopilot.com/embeddings";

const EMBEDDING_MODEL: &str = "copilot-text-embedding-ada-002";
/// The embeddings endpoint accepts at most this many inputs per request
const EMBEDDING_BATCH: usize = 18;

const LOGIN_HEADERS: &[(&str, &str)] = &[
    ("accept", "application/json"),
    ("content-type", "application/json"),
    ("editor-version", "Neovim/0.9.2"),
    ("editor-plugin-version", "copilot.lua/1.11.4"),
    ("user-agent", "GithubCopilot/1.133.0"),
];

const EDITOR_VERSION: &str = "vscode/1.85.1";
const EDITOR_PLUGIN_VERSION: &str = "copilot-chat/0.12.2023120701";
const CHAT_USER_AGENT: &str = "GitHubCopilotChat/0.12.2023120701";

/// Parameters of one chat turn
#[derive(Debug, Clone)]
pub struct AskRequest<'a> {
    /// Empty selects the default instructions
    pub system_prompt: &'a str,
    pub prompt: &'a str,
    /// Active selection, sent along when non-empty
    pub code: &'a str,
    /// Fence language of `code`
    pub language: &'a str,
    pub model: &'a str,
    pub temperature: f64,
}

/// What one line of the event stream carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// `[DONE]`: the answer is complete
    Done,
    /// Blank, unparseable or content-free line
    Skip,
    Delta(String),
}

/// Decode one server-sent event line
pub fn parse_stream_line(line: &str) -> Result<StreamLine, ChatError> {
    let line = line.strip_prefix("data: ").unwrap_or(line).trim();
    if line.starts_with("[DONE]") {
        return Ok(StreamLine::Done);
    }
    if line.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let chunk: Value = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(line, "skipping undecodable stream line: {}", e);
            return Ok(StreamLine::Skip);
        }
    };
    let Some(choices) = chunk.get("choices") else {
        return Err(ChatError::MissingChoices(line.to_string()));
    };
    let content = choices
        .get(0)
        .and_then(|choice| choice.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str);

    Ok(match content {
        Some(content) => StreamLine::Delta(content.to_string()),
        None => StreamLine::Skip,
    })
}

/// Feed every content delta of a completions stream to `on_delta`; returns the whole answer
pub fn read_stream<R, F>(reader: R, mut on_delta: F) -> Result<String, ChatError>
where
    R: BufRead,
    F: FnMut(&str) -> anyhow::Result<()>,
{
    let mut full_response = String::new();
    for line in reader.lines() {
        match parse_stream_line(&line?)? {
            StreamLine::Done => break,
            StreamLine::Skip => continue,
            StreamLine::Delta(content) => {
                on_delta(&content).map_err(ChatError::Sink)?;
                full_response.push_str(&content);
            }
        }
    }
    Ok(full_response)
}

/// System prompt, then history; the code excerpt goes right before the last message
pub fn build_chat_request(
    history: &[Message],
    code: &str,
    language: &str,
    system_prompt: &str,
    model: &str,
    temperature: f64,
) -> ChatRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system_prompt));
    messages.extend(history.iter().cloned());

    if !code.is_empty() {
        let selection = Message::system(format!(
            "\nActive selection:\n```{}\n{}\n```",
            language, code
        ));
        let at = messages.len() - 1;
        messages.insert(at, selection);
    }

    ChatRequest {
        intent: true,
        model: model.to_string(),
        n: 1,
        stream: true,
        temperature,
        top_p: 1,
        messages,
    }
}

pub fn embedding_request(inputs: &[FileExtract]) -> EmbeddingRequest {
    let input = inputs
        .iter()
        .map(|extract| {
            let extension = extract.filepath.rsplit('.').next().unwrap_or_default();
            format!(
                "File: `{}`\n```{}\n{}```",
                extract.filepath, extension, extract.code
            )
        })
        .collect();
    EmbeddingRequest {
        input,
        model: EMBEDDING_MODEL.to_string(),
    }
}

/// Interpret one access-token poll response
pub fn poll_outcome(response: AccessTokenResponse) -> Result<PollOutcome, AuthError> {
    if let Some(access_token) = response.access_token {
        return Ok(PollOutcome::Authorized {
            access_token,
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
        });
    }
    match response.error.as_deref() {
        None | Some("authorization_pending") => Ok(PollOutcome::Pending),
        Some("slow_down") => Ok(response
            .interval
            .map(PollOutcome::SlowDown)
            .unwrap_or(PollOutcome::Pending)),
        Some("expired_token") => Err(AuthError::Timeout),
        Some(other) => Err(AuthError::Denied(other.to_string())),
    }
}

/// Proxy URLs without a scheme are ignored
pub fn effective_proxy(proxy: Option<&str>) -> Option<&str> {
    proxy.filter(|p| p.contains("://"))
}

fn random_hex(length: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Deserialize)]
struct GithubUser {
    login: String,
}

/// Client for one chat conversation
pub struct CopilotClient {
    http: reqwest::blocking::Client,
    github_token: Option<String>,
    session_token: Option<SessionToken>,
    history: Vec<Message>,
    vscode_sessionid: String,
    machine_id: String,
    /// Where a fresh login is cached; `None` for the default hosts.json
    token_cache: Option<PathBuf>,
}

// Debug without the token
impl std::fmt::Debug for CopilotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CopilotClient")
            .field("github_token", &self.github_token.as_ref().map(|_| "[REDACTED]"))
            .field("session_token", &self.session_token)
            .field("history", &self.history.len())
            .field("vscode_sessionid", &self.vscode_sessionid)
            .finish()
    }
}

impl CopilotClient {
    /// `github_token`: a cached OAuth token, if any. `proxy` is used for every request.
    pub fn new(github_token: Option<String>, proxy: Option<&str>) -> Result<Self, ChatError> {
        let mut builder = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            // answers stream for as long as they take
            .timeout(None::<Duration>);
        if let Some(proxy) = effective_proxy(proxy) {
            debug!(proxy, "using proxy");
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }

        Ok(Self {
            http: builder.build()?,
            github_token,
            session_token: None,
            history: Vec::new(),
            vscode_sessionid: format!("{}{}", Uuid::new_v4(), chrono::Utc::now().timestamp_millis()),
            machine_id: random_hex(65),
            token_cache: None,
        })
    }

    /// Cache logins at `path` instead of the shared hosts.json
    pub fn with_token_cache(mut self, path: PathBuf) -> Self {
        self.token_cache = Some(path);
        self
    }

    pub fn is_signed_in(&self) -> bool {
        self.github_token.is_some()
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Forget the conversation
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Start the device flow
    pub fn request_auth(&self) -> Result<DeviceCode, AuthError> {
        let mut request = self.http.post(DEVICE_CODE_URL);
        for (name, value) in LOGIN_HEADERS {
            request = request.header(*name, *value);
        }
        let code = request
            .json(&json!({ "client_id": CLIENT_ID, "scope": "read:user" }))
            .send()?
            .json::<DeviceCode>()?;
        Ok(code)
    }

    pub fn poll_auth(&self, device_code: &str) -> Result<PollOutcome, AuthError> {
        let mut request = self.http.post(ACCESS_TOKEN_URL);
        for (name, value) in LOGIN_HEADERS {
            request = request.header(*name, *value);
        }
        let response = request
            .json(&json!({
                "client_id": CLIENT_ID,
                "device_code": device_code,
                "grant_type": "urn:ietf:params:oauth:grant-type:device_code",
            }))
            .send()?
            .json::<AccessTokenResponse>()?;
        debug!(?response, "device flow poll");
        poll_outcome(response)
    }

    fn fetch_user(&self, access_token: &str, token_type: &str) -> Result<String, AuthError> {
        let user = self
            .http
            .get(USER_URL)
            .header("authorization", format!("{} {}", token_type, access_token))
            .header("user-agent", "GithubCopilot/1.133.0")
            .header("accept", "application/json")
            .send()?
            .json::<GithubUser>()?;
        Ok(user.login)
    }

    /// Wait for the user to authorize `code`, then cache the token. Returns the GitHub login.
    pub fn complete_login<C: PollClock + ?Sized>(
        &mut self,
        code: &DeviceCode,
        clock: &mut C,
    ) -> Result<String, AuthError> {
        let (access_token, token_type) =
            auth::wait_for_authorization(code, clock, |device_code| self.poll_auth(device_code))?;
        let user = self.fetch_user(&access_token, &token_type)?;

        match &self.token_cache {
            Some(path) => auth::save_token_to(path, &user, &access_token)?,
            None => auth::save_token(&user, &access_token)?,
        }
        info!(user, "signed in to GitHub");
        self.github_token = Some(access_token);
        Ok(user)
    }

    /// Exchange the GitHub token for a Copilot session token
    pub fn authenticate(&mut self) -> Result<(), ChatError> {
        let github_token = self.github_token.as_deref().ok_or(AuthError::NoToken)?;
        let response = self
            .http
            .get(SESSION_TOKEN_URL)
            .header("authorization", format!("token {}", github_token))
            .header("editor-version", EDITOR_VERSION)
            .header("editor-plugin-version", EDITOR_PLUGIN_VERSION)
            .header("user-agent", CHAT_USER_AGENT)
            .send()?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(ChatError::from_status(status));
        }
        let token = response.json::<SessionToken>()?;
        debug!(expires_at = token.expires_at, "refreshed Copilot session token");
        self.session_token = Some(token);
        Ok(())
    }

    /// Session token, refreshed when missing or expired
    fn session_token(&mut self) -> Result<String, ChatError> {
        let expired = self
            .session_token
            .as_ref()
            .map_or(true, |token| token.is_expired(unix_now()));
        if expired {
            self.authenticate()?;
        }
        self.session_token
            .as_ref()
            .map(|token| token.token.clone())
            .ok_or(ChatError::Auth(AuthError::NoToken))
    }

    fn chat_headers(&self, token: &str) -> Vec<(&'static str, String)> {
        vec![
            ("authorization", format!("Bearer {}", token)),
            ("x-request-id", Uuid::new_v4().to_string()),
            ("vscode-sessionid", self.vscode_sessionid.clone()),
            ("machineid", self.machine_id.clone()),
            ("editor-version", EDITOR_VERSION.to_string()),
            ("editor-plugin-version", EDITOR_PLUGIN_VERSION.to_string()),
            ("openai-organization", "github-copilot".to_string()),
            ("openai-intent", "conversation-panel".to_string()),
            ("content-type", "application/json".to_string()),
            ("user-agent", CHAT_USER_AGENT.to_string()),
        ]
    }

    fn post(&self, url: &str, token: &str) -> reqwest::blocking::RequestBuilder {
        let mut request = self.http.post(url);
        for (name, value) in self.chat_headers(token) {
            request = request.header(name, value);
        }
        request
    }

    /// Ask one question; `on_delta` sees the answer as it streams in
    pub fn ask<F>(&mut self, request: &AskRequest<'_>, on_delta: F) -> Result<String, ChatError>
    where
        F: FnMut(&str) -> anyhow::Result<()>,
    {
        let token = self.session_token()?;
        let system_prompt = if request.system_prompt.is_empty() {
            COPILOT_INSTRUCTIONS
        } else {
            request.system_prompt
        };

        self.history.push(Message::user(request.prompt));
        let body = build_chat_request(
            &self.history,
            request.code,
            request.language,
            system_prompt,
            request.model,
            request.temperature,
        );
        debug!(
            model = request.model,
            temperature = request.temperature,
            messages = body.messages.len(),
            "sending chat request"
        );

        let response = self.post(CHAT_URL, &token).json(&body).send()?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ChatError::from_status(status));
        }

        let full_response = read_stream(BufReader::new(response), on_delta)?;
        self.history.push(Message::system(full_response.clone()));
        Ok(full_response)
    }

    /// One embedding vector per input, in order
    pub fn embeddings(&mut self, inputs: &[FileExtract]) -> Result<Vec<Vec<f64>>, ChatError> {
        let token = self.session_token()?;
        let mut embeddings = Vec::with_capacity(inputs.len());

        for batch in inputs.chunks(EMBEDDING_BATCH) {
            let response: Value = self
                .post(EMBEDDINGS_URL, &token)
                .json(&embedding_request(batch))
                .send()?
                .json()?;
            let data = response
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| ChatError::Embeddings(response.to_string()))?;

            for item in data {
                let vector = item
                    .get("embedding")
                    .and_then(Value::as_array)
                    .ok_or_else(|| ChatError::Embeddings(item.to_string()))?
                    .iter()
                    .filter_map(Value::as_f64)
                    .collect();
                embeddings.push(vector);
            }
        }
        Ok(embeddings)
    }
}
