pub mod config;
pub mod diagnostics;
pub mod dump;
pub mod engine;
pub mod error;
pub mod session;
pub mod transport;

pub use config::{EngineConfig, RetryPolicy};
pub use engine::{TransactionEngine, TransactionError, TransferOutcome};
pub use error::{Error, Result};
pub use session::{Session, SessionError};
pub use transport::{Transport, TransferStatus};

pub fn run(cfg: config::Config) -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;
    let level = match cfg.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level))
        .with_writer(std::io::stderr)
        .init();

    if cfg.check {
        diagnostics::check(&cfg)?;
        println!("All preflight checks passed");
        return Ok(());
    }

    let vendor_id = cfg.vendor_id()?;
    let product_id = cfg.product_id()?;
    let request = cfg.request_bytes()?;
    let engine_config = cfg.engine_config()?;

    let mut session = Session::open(vendor_id, product_id, engine_config)?;
    tracing::info!(
        device = format!("{vendor_id:04x}:{product_id:04x}"),
        "Session open"
    );

    let reply = session.send_recv(&request, cfg.reply_len)?;
    println!("{}", hex::encode(&reply));

    session.close();
    Ok(())
}
