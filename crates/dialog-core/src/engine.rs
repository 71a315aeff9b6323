//! One-struct assembly of the full stack.
//!
//! [`Engine`] wires the dispatcher, worker pool, timer wheel, transport
//! pool, transaction layer and dialog layer together from a single
//! [`EngineConfig`]. `bind` also opens the UDP socket and pumps its
//! packets in; `with_transports` leaves transport ownership with the
//! caller, which is how the tests run the stack over doubles.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, info};

use siprail_dispatch_core::{CongestionPolicy, Dispatcher, TimerWheel, WorkerPool};
use siprail_sip_transport::{bind_udp, TransportEvent, TransportKind, TransportPool};
use siprail_transaction_core::{TransactionEvent, TransactionManager};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::DialogEvent;
use crate::manager::DialogManager;

pub struct Engine {
    dispatcher: Arc<Dispatcher>,
    pool: WorkerPool,
    wheel: Arc<TimerWheel>,
    transports: Arc<TransportPool>,
    dialogs: DialogManager,
    transaction_events: Receiver<TransactionEvent>,
    packets: Option<Receiver<TransportEvent>>,
    pumps: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Builds the stack and binds the UDP transport at
    /// `config.bind_addr`. Nothing runs until [`Engine::start`].
    pub fn bind(config: &EngineConfig) -> Result<(Engine, Receiver<DialogEvent>)> {
        let transports = Arc::new(TransportPool::new());
        let (udp, packets) = bind_udp(config.bind_addr)?;
        transports.register(Arc::new(udp));
        let (mut engine, events) = Engine::with_transports(config, transports)?;
        engine.packets = Some(packets);
        Ok((engine, events))
    }

    /// Builds the stack over transports the caller already owns. The
    /// caller drains their receivers into
    /// [`TransactionManager::handle_transport_event`].
    pub fn with_transports(
        config: &EngineConfig,
        transports: Arc<TransportPool>,
    ) -> Result<(Engine, Receiver<DialogEvent>)> {
        config.validate()?;
        let dispatch = &config.dispatch;
        let dispatcher = Arc::new(Dispatcher::from_config(dispatch)?);
        let pool = WorkerPool::new(Arc::clone(&dispatcher), dispatch);
        let wheel = Arc::new(TimerWheel::new(Arc::clone(&dispatcher), dispatch));
        let (transactions, transaction_events) = TransactionManager::new(
            Arc::clone(&dispatcher),
            Arc::clone(&wheel),
            Arc::clone(&transports),
            CongestionPolicy::from_config(dispatch),
            config.timer_settings(),
        );
        let (dialogs, dialog_events) = DialogManager::new(transactions);
        let engine = Engine {
            dispatcher,
            pool,
            wheel,
            transports,
            dialogs,
            transaction_events,
            packets: None,
            pumps: Mutex::new(Vec::new()),
        };
        Ok((engine, dialog_events))
    }

    /// Starts the worker lanes, the timer wheel and the pump threads.
    /// Fails if the engine is already running.
    pub fn start(&self) -> Result<()> {
        self.pool.start()?;
        self.wheel.start()?;

        let mut pumps = self.pumps.lock();
        pumps.push(self.dialogs.spawn_pump(self.transaction_events.clone())?);
        if let Some(packets) = &self.packets {
            let transactions = self.dialogs.transactions().clone();
            let packets = packets.clone();
            let pump = thread::Builder::new()
                .name("siprail-transport".into())
                .spawn(move || {
                    // The pool keeps the transport (and its sender) alive
                    // after close, so the exit signal is the Closed event,
                    // not channel disconnection.
                    for event in packets {
                        let closed = matches!(event, TransportEvent::Closed);
                        transactions.handle_transport_event(TransportKind::Udp, event);
                        if closed {
                            break;
                        }
                    }
                    debug!("transport stream closed, packet pump exits");
                })?;
            pumps.push(pump);
        }
        info!(
            lanes = self.dispatcher.lane_count(),
            "engine started"
        );
        Ok(())
    }

    /// Stops everything and joins every thread. Final: a stopped engine
    /// refuses new work rather than restarting.
    pub fn stop(&self) {
        self.dialogs.shutdown();
        self.transports.close_all();
        self.wheel.stop();
        self.pool.stop();
        for pump in self.pumps.lock().drain(..) {
            let _ = pump.join();
        }
        info!("engine stopped");
    }

    pub fn dialogs(&self) -> &DialogManager {
        &self.dialogs
    }

    pub fn transactions(&self) -> &TransactionManager {
        self.dialogs.transactions()
    }

    pub fn transports(&self) -> &Arc<TransportPool> {
        &self.transports
    }

    /// The dispatcher underneath, for queue depth introspection
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The worker pool, for lane health checks and restarts
    pub fn workers(&self) -> &WorkerPool {
        &self.pool
    }
}
