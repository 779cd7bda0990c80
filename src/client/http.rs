use std::sync::Arc;

use async_stream::stream;
use futures::{FutureExt, StreamExt, future::BoxFuture};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::{
    client::api::{ApiError, CompetitionApi, RoomSignal, RoomStream},
    dto::{
        competition::{CompetitionSnapshot, EndCompetitionRequest, EndCompetitionResponse},
        events::RoomEvent,
        submission::{SubmissionResponse, SubmitRequest},
    },
    routes::session::USER_HEADER,
    state::{competition::CompetitionId, state_machine::EndTrigger},
};

const EVENT_RESYNC: &str = "resync";
const EVENT_HANDSHAKE: &str = "handshake";

/// Adapter talking to a remote backend over HTTP, acting as `user`.
#[derive(Clone)]
pub struct HttpCompetitionApi {
    client: Client,
    base_url: Arc<str>,
    user: Arc<str>,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl HttpCompetitionApi {
    /// Build an adapter for the backend at `base_url`.
    pub fn new(base_url: &str, user: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            user: Arc::from(user),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, url)
            .header(USER_HEADER, self.user.as_ref())
    }

    async fn send_json<B, T>(&self, method: Method, path: String, body: Option<B>) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let mut builder = self.request(method, &path);
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder
            .send()
            .await
            .map_err(|err| ApiError::Transport(err.to_string()))?;
        let response = check_status(response).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Transport(format!("invalid response from {path}: {err}")))
    }
}

/// Server errors and throttling are transient; other failures carry the body's code.
async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status.is_server_error() || status.as_u16() == 429 {
        return Err(ApiError::Transport(format!("backend answered {status}")));
    }
    match response.json::<ErrorBody>().await {
        Ok(body) => Err(ApiError::Rejected {
            code: body.code,
            message: body.message,
        }),
        Err(_) => Err(ApiError::Rejected {
            code: status.as_str().to_owned(),
            message: format!("backend answered {status}"),
        }),
    }
}

impl CompetitionApi for HttpCompetitionApi {
    fn fetch(&self, id: CompetitionId) -> BoxFuture<'static, Result<CompetitionSnapshot, ApiError>> {
        let api = self.clone();
        async move {
            api.send_json::<(), _>(Method::GET, format!("/competitions/{id}"), None)
                .await
        }
        .boxed()
    }

    fn submit(
        &self,
        id: CompetitionId,
        request: SubmitRequest,
    ) -> BoxFuture<'static, Result<SubmissionResponse, ApiError>> {
        let api = self.clone();
        async move {
            api.send_json(
                Method::POST,
                format!("/competitions/{id}/submissions"),
                Some(request),
            )
            .await
        }
        .boxed()
    }

    fn end(
        &self,
        id: CompetitionId,
        trigger: EndTrigger,
    ) -> BoxFuture<'static, Result<EndCompetitionResponse, ApiError>> {
        let api = self.clone();
        async move {
            api.send_json(
                Method::POST,
                format!("/competitions/{id}/end"),
                Some(EndCompetitionRequest { trigger }),
            )
            .await
        }
        .boxed()
    }

    fn subscribe(&self, id: CompetitionId) -> BoxFuture<'static, Result<RoomStream, ApiError>> {
        let api = self.clone();
        async move {
            let response = api
                .request(Method::GET, &format!("/competitions/{id}/events"))
                .send()
                .await
                .map_err(|err| ApiError::Transport(err.to_string()))?;
            let mut body = Box::pin(check_status(response).await?.bytes_stream());

            let signals = stream! {
                let mut parser = SseParser::default();
                while let Some(chunk) = body.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            warn!(competition_id = %id, error = %err, "room stream interrupted");
                            break;
                        }
                    };
                    for frame in parser.push(&chunk) {
                        if let Some(signal) = frame.into_signal() {
                            yield signal;
                        }
                    }
                }
            };
            Ok(signals.boxed())
        }
        .boxed()
    }
}

/// One dispatched SSE frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct SseFrame {
    event: Option<String>,
    data: String,
}

impl SseFrame {
    fn into_signal(self) -> Option<RoomSignal> {
        let name = self.event?;
        match name.as_str() {
            EVENT_HANDSHAKE => None,
            EVENT_RESYNC => Some(RoomSignal::Resync),
            _ => match RoomEvent::from_parts(&name, &self.data) {
                Ok(event) => Some(RoomSignal::Event(event)),
                Err(err) => {
                    debug!(event = %name, error = %err, "ignoring unknown room event");
                    None
                }
            },
        }
    }
}

/// Incremental `text/event-stream` decoder.
///
/// Bytes are buffered until a full line is in, so a UTF-8 sequence split
/// between two network chunks is decoded whole.
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    current: SseFrame,
}

impl SseParser {
    /// Feed a chunk and return every frame it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                let frame = std::mem::take(&mut self.current);
                if frame.event.is_some() || !frame.data.is_empty() {
                    frames.push(frame);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.current.event = Some(value.to_owned()),
                "data" => {
                    if !self.current.data.is_empty() {
                        self.current.data.push('\n');
                    }
                    self.current.data.push_str(value);
                }
                _ => {}
            }
        }

        frames
    }
}
