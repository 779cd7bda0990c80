use async_stream::stream;
use futures::{FutureExt, StreamExt, future::BoxFuture};
use tokio::sync::broadcast::error::RecvError;

use crate::{
    client::api::{ApiError, CompetitionApi, RoomSignal, RoomStream},
    dto::{
        competition::{CompetitionSnapshot, EndCompetitionResponse},
        submission::{SubmissionResponse, SubmitRequest},
    },
    services::{competition_service, submission_service},
    state::{SharedState, competition::CompetitionId, state_machine::EndTrigger},
};

/// In-process adapter calling the services directly, acting as `user`.
#[derive(Clone)]
pub struct LocalCompetitionApi {
    state: SharedState,
    user: String,
}

impl LocalCompetitionApi {
    /// Adapter acting as `user` against `state`.
    pub fn new(state: SharedState, user: impl Into<String>) -> Self {
        Self {
            state,
            user: user.into(),
        }
    }
}

impl CompetitionApi for LocalCompetitionApi {
    fn fetch(&self, id: CompetitionId) -> BoxFuture<'static, Result<CompetitionSnapshot, ApiError>> {
        let state = self.state.clone();
        async move { Ok(competition_service::get(&state, id).await?) }.boxed()
    }

    fn submit(
        &self,
        id: CompetitionId,
        request: SubmitRequest,
    ) -> BoxFuture<'static, Result<SubmissionResponse, ApiError>> {
        let api = self.clone();
        async move { Ok(submission_service::submit(&api.state, id, &api.user, request).await?) }
            .boxed()
    }

    fn end(
        &self,
        id: CompetitionId,
        trigger: EndTrigger,
    ) -> BoxFuture<'static, Result<EndCompetitionResponse, ApiError>> {
        let api = self.clone();
        async move {
            Ok(competition_service::end(&api.state, id, Some(&api.user), trigger).await?)
        }
        .boxed()
    }

    fn subscribe(&self, id: CompetitionId) -> BoxFuture<'static, Result<RoomStream, ApiError>> {
        let state = self.state.clone();
        async move {
            let (mut receiver, _) = state.join_room(id).await?;

            let signals = stream! {
                loop {
                    match receiver.recv().await {
                        Ok(event) => yield RoomSignal::Event(event),
                        Err(RecvError::Lagged(_)) => yield RoomSignal::Resync,
                        Err(RecvError::Closed) => break,
                    }
                }
            };
            Ok(signals.boxed())
        }
        .boxed()
    }
}
