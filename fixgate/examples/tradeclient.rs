//! Trade client: logs on to an executor and sends orders typed on stdin.
//!
//! Usage: `cargo run --example tradeclient [settings file]`
//!
//! Each line is `<buy|sell> <symbol> <quantity> [price]`; `quit` logs out.
//! Without a settings file the client connects as `FIX.4.4:CLIENT->EXEC` to
//! `FIX_HOST:FIX_PORT` (default 127.0.0.1:9876).

use async_trait::async_trait;
use fixgate::prelude::*;
use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 9876;
const TRANSACT_TIME: u32 = 60;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

fn default_settings() -> String {
    let host = std::env::var("FIX_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let port = std::env::var("FIX_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    format!(
        "[DEFAULT]\n\
         ConnectionType=initiator\n\
         SocketConnectHost={host}\n\
         SocketConnectPort={port}\n\
         HeartBtInt=30\n\
         ReconnectInterval=5\n\
         \n\
         [SESSION]\n\
         BeginString=FIX.4.4\n\
         SenderCompID=CLIENT\n\
         TargetCompID=EXEC\n"
    )
}

struct TradeClient;

#[async_trait]
impl Application for TradeClient {
    async fn on_logon(&self, session_id: &SessionId) {
        info!(session = %session_id, "logon");
    }

    async fn on_logout(&self, session_id: &SessionId) {
        info!(session = %session_id, "logout");
    }

    async fn from_app(
        &self,
        message: &Message,
        _session_id: &SessionId,
    ) -> std::result::Result<(), RejectReason> {
        if message.msg_type() != Some(MsgType::ExecutionReport) {
            return Err(RejectReason::UnsupportedMessageType);
        }
        info!(
            cl_ord_id = message.get_field(tags::CL_ORD_ID),
            order_id = message.get_field(tags::ORDER_ID),
            status = message.get_field(tags::ORD_STATUS),
            avg_px = message.get_field(tags::AVG_PX),
            "execution report"
        );
        Ok(())
    }
}

/// Parses `<buy|sell> <symbol> <quantity> [price]` into a NewOrderSingle.
fn parse_order(line: &str, cl_ord_id: u64) -> Option<Message> {
    let mut words = line.split_whitespace();
    let side = match words.next()?.to_ascii_lowercase().as_str() {
        "buy" => "1",
        "sell" => "2",
        _ => return None,
    };
    let symbol = words.next()?;
    let quantity: u64 = words.next()?.parse().ok()?;
    let price = words.next();

    let mut order = Message::with_msg_type(&MsgType::NewOrderSingle)
        .with_field(tags::CL_ORD_ID, format!("C{cl_ord_id}"))
        .with_field(tags::SYMBOL, symbol)
        .with_field(tags::SIDE, side)
        .with_field(tags::ORDER_QTY, quantity.to_string());
    let body = order.body_mut();
    match price {
        Some(price) => {
            body.set_field(tags::ORD_TYPE, "2");
            body.set_field(tags::PRICE, price);
        }
        None => body.set_field(tags::ORD_TYPE, "1"),
    }
    body.set_timestamp(TRANSACT_TIME, Timestamp::now());
    Some(order)
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let settings = match std::env::args().nth(1) {
        Some(path) => SessionSettings::load(path)?,
        None => SessionSettings::parse(&default_settings())?,
    };

    let initiator = ConnectorBuilder::new(settings)
        .with_application(TradeClient)
        .build_initiator()?;
    let Some(session_id) = initiator.session_ids().into_iter().next() else {
        anyhow::bail!("no initiator session configured");
    };
    initiator.start()?;

    let next_id = AtomicU64::new(1);
    info!("enter orders as <buy|sell> <symbol> <quantity> [price], or quit");
    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let Some(order) = parse_order(line, next_id.fetch_add(1, Ordering::Relaxed)) else {
            warn!(line, "could not parse order");
            continue;
        };
        if !initiator.is_session_logged_on(&session_id) {
            warn!(session = %session_id, "not logged on, order will be resent after logon");
        }
        initiator.send_to_target(order, &session_id)?;
    }

    initiator.stop()?;
    Ok(())
}
