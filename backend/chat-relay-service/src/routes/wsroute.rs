use crate::services::ChatRelay;
use crate::state::AppState;
use crate::websocket::{ClientEvent, ConnectionId};
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

// Serialized relay event bound for the client
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Outbound(String);

// WebSocket Actor
struct WsSession {
    connection_id: ConnectionId,
    /// Feeds the session's event worker; dropped when the actor stops
    events: Option<UnboundedSender<ClientEvent>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    fn new(
        connection_id: ConnectionId,
        events: UnboundedSender<ClientEvent>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            connection_id,
            events: Some(events),
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > client_timeout {
                tracing::warn!(connection_id = %act.connection_id, "WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn dispatch(&self, text: &str) {
        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => {
                if let Some(events) = &self.events {
                    let _ = events.send(event);
                }
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "Failed to parse WS message");
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session started");
        self.hb(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(connection_id = %self.connection_id, "WebSocket session stopped");
        // Closing the queue lets the worker finish pending events, then disconnect.
        self.events.take();
    }
}

impl Handler<Outbound> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

// Handle WebSocket protocol messages
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.dispatch(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                tracing::warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                tracing::info!("WebSocket close message received: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                tracing::warn!(connection_id = %self.connection_id, error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Handles one connection's events in arrival order, then tears the connection down.
async fn run_events(
    relay: ChatRelay,
    connection_id: ConnectionId,
    mut events: UnboundedReceiver<ClientEvent>,
) {
    while let Some(event) = events.recv().await {
        relay.handle_event(connection_id, event).await;
    }
    relay.disconnect(connection_id).await;
}

// HTTP handler
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (connection_id, mut rx) = state.relay.connect().await;
    let (events_tx, events_rx) = unbounded_channel();

    let session = WsSession::new(
        connection_id,
        events_tx,
        state.config.websocket.heartbeat_interval,
        state.config.websocket.client_timeout,
    );

    let (addr, resp) = match ws::start_with_addr(session, &req, stream) {
        Ok(started) => started,
        Err(e) => {
            state.relay.disconnect(connection_id).await;
            return Err(e);
        }
    };

    actix::spawn(run_events(state.relay.clone(), connection_id, events_rx));

    // Bridge the registry's channel into the actor; ends when the relay drops the session.
    actix::spawn(async move {
        while let Some(frame) = rx.recv().await {
            addr.do_send(Outbound(frame));
        }
    });

    Ok(resp)
}
