//! Order executor: accepts FIX sessions and fills every NewOrderSingle.
//!
//! Usage: `cargo run --example executor [settings file]`
//!
//! Without a settings file an acceptor for `FIX.4.4:EXEC->CLIENT` listens on
//! `FIX_PORT` (default 9876).

use async_trait::async_trait;
use fixgate::prelude::*;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

const DEFAULT_PORT: u16 = 9876;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .try_init();
}

fn default_settings() -> String {
    let port = std::env::var("FIX_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    format!(
        "[DEFAULT]\n\
         ConnectionType=acceptor\n\
         SocketAcceptPort={port}\n\
         \n\
         [SESSION]\n\
         BeginString=FIX.4.4\n\
         SenderCompID=EXEC\n\
         TargetCompID=CLIENT\n"
    )
}

struct Executor {
    sender: SessionSender,
    next_id: AtomicU64,
}

impl Executor {
    fn fill(&self, order: &Message) -> std::result::Result<Message, RejectReason> {
        let body = order.body();
        let field = |tag: u32| {
            body.get_field(tag)
                .ok_or(RejectReason::FieldNotFound { tag })
        };
        let cl_ord_id = field(tags::CL_ORD_ID)?;
        let symbol = field(tags::SYMBOL)?;
        let side = field(tags::SIDE)?;
        let quantity = body
            .get_decimal(tags::ORDER_QTY)
            .map_err(|_| RejectReason::IncorrectDataFormat { tag: tags::ORDER_QTY })?;
        let price = body.get_decimal(tags::PRICE).unwrap_or(Decimal::ZERO);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(Message::with_msg_type(&MsgType::ExecutionReport)
            .with_field(tags::ORDER_ID, format!("O{id}"))
            .with_field(tags::EXEC_ID, format!("E{id}"))
            .with_field(tags::EXEC_TYPE, "F")
            .with_field(tags::ORD_STATUS, "2")
            .with_field(tags::CL_ORD_ID, cl_ord_id)
            .with_field(tags::SYMBOL, symbol)
            .with_field(tags::SIDE, side)
            .with_field(tags::ORDER_QTY, quantity.to_string())
            .with_field(tags::LEAVES_QTY, "0")
            .with_field(tags::CUM_QTY, quantity.to_string())
            .with_field(tags::AVG_PX, price.to_string()))
    }
}

#[async_trait]
impl Application for Executor {
    async fn on_logon(&self, session_id: &SessionId) {
        info!(session = %session_id, "logon");
    }

    async fn on_logout(&self, session_id: &SessionId) {
        info!(session = %session_id, "logout");
    }

    async fn from_app(
        &self,
        message: &Message,
        session_id: &SessionId,
    ) -> std::result::Result<(), RejectReason> {
        if message.msg_type() != Some(MsgType::NewOrderSingle) {
            return Err(RejectReason::UnsupportedMessageType);
        }
        let report = self.fill(message)?;
        info!(session = %session_id, cl_ord_id = message.get_field(tags::CL_ORD_ID), "filling order");
        if let Err(err) = self.sender.send_to_target(report, session_id) {
            warn!(session = %session_id, error = %err, "execution report not queued");
        }
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let settings = match std::env::args().nth(1) {
        Some(path) => SessionSettings::load(path)?,
        None => SessionSettings::parse(&default_settings())?,
    };

    let builder = ConnectorBuilder::new(settings);
    let executor = Executor {
        sender: builder.sender(),
        next_id: AtomicU64::new(1),
    };
    let acceptor = builder.with_application(executor).build_acceptor()?;
    acceptor.start()?;
    for id in acceptor.session_ids() {
        info!(session = %id, "waiting for counterparty");
    }

    info!("press enter to stop");
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    acceptor.stop()?;
    Ok(())
}
