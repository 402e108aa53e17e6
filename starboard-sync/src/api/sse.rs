//! GET /events: mirror and job events as Server-Sent Events

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use starboard_common::sse::create_event_sse_stream;
use std::convert::Infallible;

use crate::AppState;

pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    create_event_sse_stream("starboard-sync", &state.event_bus)
}
