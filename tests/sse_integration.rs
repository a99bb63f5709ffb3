// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Integration tests for the server-sent event source using wiremock.

use futures_util::StreamExt;
use particlehub::StreamError;
use particlehub::stream::{EventSource, RawEvent, SseSource};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BODY: &str = ":ok\n\n\
event: DATA\n\
data: {\"coreid\":\"aaa\",\"data\":\"temp=21\",\"published_at\":\"2026-03-01T12:00:00.000Z\"}\n\n\
event: LOG\r\n\
data: line one\r\n\
data: line two\r\n\r\n\
event: LOG\n\
data: unterminated";

#[tokio::test]
async fn decodes_events_until_close() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/devices/events"))
        .and(header("accept", "text/event-stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(BODY),
        )
        .mount(&server)
        .await;

    let source = SseSource::new(format!("{}/v1/devices/events", server.uri())).unwrap();
    let events: Vec<RawEvent> = source
        .open()
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event, "DATA");
    assert!(events[0].data.contains("temp=21"));
    assert_eq!(events[1], RawEvent::new("LOG", "line one\nline two"));
}

#[tokio::test]
async fn non_success_status_fails_to_open() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let source = SseSource::new(format!("{}/v1/devices/events", server.uri())).unwrap();
    let err = match source.open().await {
        Ok(_) => panic!("stream should not open"),
        Err(e) => e,
    };
    assert!(matches!(err, StreamError::Status(403)));
}
