use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures_core::Stream;
use medmcp_bus::Topic;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/stream", get(event_stream))
}

/// Every bus message as an SSE event named after its topic. Subscriptions
/// are dropped with the stream when the client disconnects.
async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscriptions = Vec::with_capacity(Topic::ALL.len());
    for topic in Topic::ALL {
        subscriptions.push(state.bus.subscribe(topic).await);
    }

    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;

            for sub in subscriptions.iter_mut() {
                while let Some(msg) = sub.try_recv() {
                    if let Ok(json) = serde_json::to_string(&msg) {
                        yield Ok(Event::default().event(sub.topic.as_str()).data(json));
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
