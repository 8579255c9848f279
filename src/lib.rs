//! Relays a single IPv6 SLAAC network's Neighbor Discovery traffic across
//! two or more Ethernet-like interfaces.

pub mod cli;
pub mod error;
pub mod handler;
pub mod interface;
pub mod logging;
pub mod packet;
pub mod queue;
pub mod request_manager;
pub mod route_manager;
pub mod sniffer;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cli::Args;
use error::ProxyError;
use handler::{Handler, PcapSender};
use interface::InterfaceRegistry;

/// Builds the interface registry and sender, starts sniffers, timer, and
/// the handler loop, then blocks until a shutdown signal arrives.
pub fn run(args: Args) -> Result<(), ProxyError> {
    let mut registry = InterfaceRegistry::new();
    for name in &args.interfaces {
        registry.register(name)?;
    }

    let save_path =
        (!args.routes_save_file.is_empty()).then(|| PathBuf::from(&args.routes_save_file));

    let sender = Arc::new(PcapSender::open(&registry)?);
    let handler = Arc::new(Handler::new(
        registry,
        sender,
        Duration::from_secs(args.probe_interval),
        args.probe_retries,
    ));

    if let Some(path) = &save_path {
        if path.exists() {
            if let Err(e) = handler
                .routes()
                .lock()
                .unwrap()
                .load_routes(path, handler.registry())
            {
                log::warn!("failed to load saved routes from {}: {e}", path.display());
            }
        }
    }

    let (tx, rx) = queue::channel();
    let _sniffer_handles = sniffer::start_all(handler.registry(), tx)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    install_signal_handlers(shutdown.clone());

    let timer_handler = handler.clone();
    let timer_shutdown = shutdown.clone();
    let alarm_interval = Duration::from_secs(args.alarm_interval);
    std::thread::spawn(move || {
        while !timer_shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(alarm_interval);
            timer_handler.tick();
        }
    });

    let run_handler = handler.clone();
    let run_thread = std::thread::spawn(move || {
        run_handler.run(rx);
    });

    wait_for_shutdown(&shutdown);
    handler.on_exit(save_path.as_deref());
    drop(run_thread);
    Ok(())
}

fn wait_for_shutdown(shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }
}

fn install_signal_handlers(shutdown: Arc<AtomicBool>) {
    for sig in [
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGQUIT,
        signal_hook::consts::SIGHUP,
    ] {
        if let Err(e) = signal_hook::flag::register(sig, shutdown.clone()) {
            log::error!("failed to register signal handler for {sig}: {e}");
        }
    }
}
