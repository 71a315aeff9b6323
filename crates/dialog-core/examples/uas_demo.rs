//! Minimal answering machine: binds UDP, answers every INVITE with 180
//! Ringing and then 200 OK, and logs the calls that come and go. BYE,
//! CANCEL and retransmissions are handled by the engine.
//!
//! ```sh
//! cargo run --example uas_demo -- engine.toml
//! ```
//!
//! Without an argument the engine binds 0.0.0.0:5060 with defaults.

use std::env;

use tracing::{error, info};

use siprail_dialog_core::{DialogEvent, Engine, EngineConfig};
use siprail_sip_core::builder::{ensure_to_tag, generate_tag, response_for};
use siprail_sip_core::{HeaderName, StatusCode};

fn main() -> siprail_dialog_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,siprail_dialog_core=debug".into()),
        )
        .init();

    let config = match env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let (engine, events) = Engine::bind(&config)?;
    engine.start()?;
    info!(addr = %config.bind_addr, "answering machine is up");

    let contact = format!("<sip:{}>", config.bind_addr);
    for event in events {
        match event {
            DialogEvent::InviteReceived { key, request, source } => {
                info!(%source, call_id = ?request.call_id(), "incoming call");
                let tag = generate_tag();

                let mut ringing = response_for(&request, StatusCode::Ringing);
                ensure_to_tag(&mut ringing, &tag);
                ringing.set_header(HeaderName::Contact, contact.clone());
                if let Err(error) = engine.dialogs().respond(&key, ringing) {
                    error!(%error, "could not ring");
                    continue;
                }

                let mut ok = response_for(&request, StatusCode::Ok);
                ensure_to_tag(&mut ok, &tag);
                ok.set_header(HeaderName::Contact, contact.clone());
                if let Err(error) = engine.dialogs().respond(&key, ok) {
                    error!(%error, "could not answer");
                }
            }
            DialogEvent::AckReceived { id, .. } => info!(%id, "call is up"),
            DialogEvent::Terminated { id, reason } => info!(%id, %reason, "call ended"),
            DialogEvent::Cancelled { key, .. } => info!(%key, "caller gave up"),
            _ => {}
        }
    }
    engine.stop();
    Ok(())
}
