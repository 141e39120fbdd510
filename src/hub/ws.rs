use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header::USER_AGENT, HeaderMap},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::{
    protocol::Inbound,
    session::{Connection, Frame, Outbox},
};

use super::HubHandle;

/// A peer that cannot take a frame within this long is cut off.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(hub): State<HubHandle>,
) -> impl IntoResponse {
    let address = forwarded_for(&headers).unwrap_or_else(|| remote.ip().to_string());
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_owned();

    ws.on_upgrade(move |socket| serve(socket, hub, address, user_agent))
}

/// First entry of `X-Forwarded-For`, when a proxy supplied one.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_owned())
}

async fn serve(socket: WebSocket, hub: HubHandle, address: String, user_agent: String) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, mut outbound) = Outbox::channel();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let message = match frame {
                Frame::Text(text) => Message::Text(text),
                Frame::Close => {
                    let _ = tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Close(None))).await;
                    break;
                }
            };
            if !matches!(tokio::time::timeout(SEND_TIMEOUT, sender.send(message)).await, Ok(Ok(()))) {
                break;
            }
        }
    });

    let Some(session_id) = hub.connect(Connection { address, user_agent, outbox }).await else {
        // refused: let the writer flush the ban notice and the close frame
        let _ = writer.await;
        return;
    };

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Inbound>(text.as_str()) {
                    Ok(message) => hub.inbound(&session_id, message).await,
                    Err(error) => debug!(%session_id, %error, "unparseable frame ignored"),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut writer => break,
        }
    }

    writer.abort();
    hub.disconnect(&session_id).await;
}
