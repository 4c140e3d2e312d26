//! # Call WebSocket Handler
//!
//! One actor per participant connection on `/ws/call/{room_id}/{user_id}`.
//! The actor owns the participant's `CallSession` (and with it the audio buffer
//! and voice-activity state), so audio is only ever touched from the actor's
//! own mailbox.
//!
//! ## Connection Lifecycle:
//! 1. **Upgrade**: HTTP request upgraded, actor started, session enters Handshaking
//! 2. **Handshake**: first text frame `{"native_lang": "xx"}` within the handshake timeout
//! 3. **Streaming**: binary PCM frames and text control frames
//! 4. **Teardown**: close frame, protocol error, heartbeat timeout or delivery failure
//!
//! Pipeline runs execute on tokio tasks; the actor only waits for their
//! completion to move the session from Flushing back to Ready.

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::call::CallSession;
use crate::error::TransportError;
use crate::protocol::OutboundMessage;
use crate::room::SessionState;
use crate::state::AppState;
use crate::transport::Connection;

/// Frames queued for the client by code running outside the actor.
#[derive(Message)]
#[rtype(result = "()")]
enum Outbound {
    Binary(Vec<u8>),
    Text(String),
    Close(ws::CloseCode, String),
}

/// `Connection` backed by the actor's mailbox.
///
/// Frames are written in send order, so a close queued after a message
/// reaches the client after that message.
struct SocketConnection {
    addr: Addr<ParticipantSocket>,
}

impl SocketConnection {
    fn queue(&self, frame: Outbound) -> Result<(), TransportError> {
        if !self.addr.connected() {
            return Err(TransportError::Disconnected);
        }
        self.addr.do_send(frame);
        Ok(())
    }
}

impl Connection for SocketConnection {
    fn send_binary(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        self.queue(Outbound::Binary(bytes))
    }

    fn send_message(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.queue(Outbound::Text(message.to_json()))
    }

    fn close(&self, reason: &str) {
        let _ = self.queue(Outbound::Close(ws::CloseCode::Away, reason.to_string()));
    }
}

/// Close code sent to the client when a session ends because of `error`.
fn close_code(error: &TransportError) -> ws::CloseCode {
    match error {
        TransportError::Disconnected => ws::CloseCode::Normal,
        TransportError::HandshakeTimeout(_) | TransportError::Protocol(_) => {
            ws::CloseCode::Policy
        }
    }
}

pub struct ParticipantSocket {
    room_id: String,
    user_id: String,
    app: AppState,
    call: Option<CallSession>,
    last_heartbeat: Instant,
}

impl ParticipantSocket {
    pub fn new(room_id: String, user_id: String, app: AppState) -> Self {
        Self {
            room_id,
            user_id,
            app,
            call: None,
            last_heartbeat: Instant::now(),
        }
    }

    fn heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let interval = Duration::from_secs(self.app.config.session.heartbeat_interval_secs);
        let timeout = Duration::from_secs(self.app.config.session.client_timeout_secs);

        ctx.run_interval(interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(
                    room_id = %act.room_id,
                    user_id = %act.user_id,
                    "WebSocket heartbeat timeout, closing connection"
                );
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn enforce_handshake_timeout(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.app.config.handshake_timeout();

        ctx.run_later(timeout, move |act, ctx| {
            let waiting = act
                .call
                .as_ref()
                .is_some_and(|call| call.state() == SessionState::Handshaking);
            if waiting {
                let error = TransportError::HandshakeTimeout(timeout);
                warn!(room_id = %act.room_id, user_id = %act.user_id, error = %error, "Closing idle connection");
                ctx.text(OutboundMessage::info(error.to_string()).to_json());
                act.end(ctx, error);
            }
        });
    }

    /// Close after every frame already queued has been written.
    fn end(&self, ctx: &mut ws::WebsocketContext<Self>, error: TransportError) {
        ctx.address()
            .do_send(Outbound::Close(close_code(&error), error.to_string()));
    }

    /// Move the session back to Ready once a pipeline run completes.
    fn watch(&self, handle: JoinHandle<()>, ctx: &mut ws::WebsocketContext<Self>) {
        let finished = handle.into_actor(self).map(|outcome, act, _ctx| {
            if let Err(e) = outcome {
                error!(user_id = %act.user_id, error = %e, "Pipeline task panicked");
            }
            if let Some(call) = act.call.as_mut() {
                call.pipeline_finished();
            }
        });
        ctx.spawn(finished);
    }

    fn after_inbound(
        &self,
        outcome: Result<Vec<JoinHandle<()>>, TransportError>,
        ctx: &mut ws::WebsocketContext<Self>,
    ) {
        match outcome {
            Ok(handles) => {
                for handle in handles {
                    self.watch(handle, ctx);
                }
            }
            Err(e) => self.end(ctx, e),
        }
    }
}

impl Actor for ParticipantSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(room_id = %self.room_id, user_id = %self.user_id, "WebSocket connection started");

        let connection: Arc<dyn Connection> = Arc::new(SocketConnection {
            addr: ctx.address(),
        });
        let mut call = CallSession::new(&self.room_id, &self.user_id, connection, self.app.clone());
        call.open();
        self.call = Some(call);

        self.heartbeat(ctx);
        self.enforce_handshake_timeout(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(room_id = %self.room_id, user_id = %self.user_id, "WebSocket connection stopped");
        if let Some(call) = self.call.as_mut() {
            call.disconnect();
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ParticipantSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                let outcome: Result<Vec<_>, _> = match self.call.as_mut() {
                    Some(call) => call.on_text(&text).map(|handle| handle.into_iter().collect()),
                    None => Err(TransportError::Disconnected),
                };
                self.after_inbound(outcome, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                let outcome = match self.call.as_mut() {
                    Some(call) => call.on_audio(&data),
                    None => Err(TransportError::Disconnected),
                };
                self.after_inbound(outcome, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(user_id = %self.user_id, reason = ?reason, "Client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(user_id = %self.user_id, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(user_id = %self.user_id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for ParticipantSocket {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        match msg {
            Outbound::Binary(bytes) => ctx.binary(bytes),
            Outbound::Text(text) => ctx.text(text),
            Outbound::Close(code, description) => {
                ctx.close(Some(ws::CloseReason {
                    code,
                    description: Some(description),
                }));
                ctx.stop();
            }
        }
    }
}

/// WebSocket endpoint: `GET /ws/call/{room_id}/{user_id}`.
pub async fn call_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<(String, String)>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (room_id, user_id) = path.into_inner();
    info!(
        room_id = %room_id,
        user_id = %user_id,
        peer = ?req.connection_info().peer_addr(),
        "New call connection request"
    );

    let socket = ParticipantSocket::new(room_id, user_id, app_state.get_ref().clone());
    ws::start(socket, &req, stream)
}
