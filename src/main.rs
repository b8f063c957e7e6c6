//! Presale purchase client.
//!
//! # Architecture Overview
//!
//! ```text
//!     CLI command
//!         │
//!         ▼
//!   ┌──────────────────────┐     ┌──────────────┐
//!   │ PurchaseOrchestrator │────▶│ NetworkGuard │──── wallet_switchEthereumChain
//!   └──────────┬───────────┘     └──────────────┘     wallet_addEthereumChain
//!              │
//!      ┌───────┴────────┐
//!      ▼                ▼
//!  ┌──────────┐   ┌────────────┐
//!  │Sequencer │◀──│ FiatBridge │◀── FiatOnramp (fiat leg)
//!  │approve → │   │ settlement │
//!  │ purchase │   │  polling   │
//!  └────┬─────┘   └────────────┘
//!       ▼
//!  ChainLedger (AlloyLedger over JSON-RPC, or InMemoryLedger for `simulate`)
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use presale_client::blockchain::{
    AlloyLedger, ChainId, ChainLedger, InMemoryLedger, SharedLedger, Wallet,
};
use presale_client::config::{load_config, ClientConfig, ConfigError};
use presale_client::observability::{logging, metrics};
use presale_client::pricing::{from_minor_units, to_minor_units};
use presale_client::purchase::{
    CancelToken, EnforcerHandle, FiatOnramp, FiatOrder, OnrampError, PaymentMethod,
    PurchaseOrchestrator, PurchaseOutcome, PurchaseRequest, SimulatedOnramp,
};

#[derive(Parser)]
#[command(name = "presale-client")]
#[command(about = "Buy sale tokens with a stablecoin or through a fiat onramp", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, default_value = "presale.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show sale price, supply and progress
    Status,
    /// Show balances and allowance of the signing account
    Account,
    /// Price a purchase against the current state
    Quote {
        #[arg(long, value_parser = parse_token_amount)]
        amount: U256,
    },
    /// Buy tokens
    Buy(BuyArgs),
    /// Register the sale token with the wallet
    AddToken,
    /// Run a purchase against an in-memory ledger
    Simulate(BuyArgs),
}

impl Commands {
    /// Commands that send wallet requests for as long as they run.
    fn uses_wallet(&self) -> bool {
        matches!(
            self,
            Commands::Buy(_) | Commands::AddToken | Commands::Simulate(_)
        )
    }
}

/// Keep the wallet on the target chain while a wallet command runs.
fn session_enforcer(orchestrator: &PurchaseOrchestrator, command: &Commands) -> Option<EnforcerHandle> {
    command
        .uses_wallet()
        .then(|| orchestrator.enforce_target_chain())
}

#[derive(Args)]
struct BuyArgs {
    /// Whole tokens to buy.
    #[arg(long, value_parser = parse_token_amount)]
    amount: U256,

    /// Pay through the fiat onramp.
    #[arg(long)]
    fiat: bool,
}

impl BuyArgs {
    fn request(&self) -> PurchaseRequest {
        let method = if self.fiat {
            PaymentMethod::FiatBridge
        } else {
            PaymentMethod::Direct
        };
        PurchaseRequest::new(self.amount, method)
    }
}

fn parse_token_amount(value: &str) -> Result<U256, String> {
    to_minor_units(value, 0).map_err(|e| e.to_string())
}

/// Onramp driven by the operator: the order is printed and the operator
/// confirms once the fiat purchase has been made.
struct ManualOnramp;

#[async_trait]
impl FiatOnramp for ManualOnramp {
    async fn purchase(&self, order: &FiatOrder) -> Result<(), OnrampError> {
        println!(
            "Buy {} {} on chain {} for {} (contract {}).",
            order.amount, order.asset_symbol, order.chain, order.recipient, order.asset
        );
        print!("Type 'done' once the provider confirms, anything else to abandon: ");
        std::io::stdout()
            .flush()
            .map_err(|e| OnrampError::Provider(e.to_string()))?;

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| OnrampError::Provider(e.to_string()))?;
        if line.trim().eq_ignore_ascii_case("done") {
            Ok(())
        } else {
            Err(OnrampError::Abandoned)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.command {
        Commands::Simulate(_) => ClientConfig::default(),
        _ => load_config(&cli.config)?,
    };

    logging::init_logging(&config.observability);
    tracing::info!(chain_id = config.network.chain_id, "presale-client v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    match &cli.command {
        Commands::Simulate(_) => simulate(config, &cli.command).await,
        command => {
            let orchestrator = connect(&config).await?;
            let _enforcer = session_enforcer(&orchestrator, command);
            run(&orchestrator, &config, command).await
        }
    }
}

async fn connect(config: &ClientConfig) -> Result<PurchaseOrchestrator, Box<dyn std::error::Error>> {
    let wallet = Wallet::from_env(ChainId(config.network.chain_id))?;
    let ledger = AlloyLedger::connect(config, &wallet).await?;
    if !ledger.is_healthy().await {
        tracing::warn!(rpc = %config.rpc.rpc_url, "RPC endpoint is not answering");
    }
    let ledger: SharedLedger = Arc::new(ledger);
    Ok(PurchaseOrchestrator::new(ledger, config, Arc::new(ManualOnramp))?)
}

async fn run(
    orchestrator: &PurchaseOrchestrator,
    config: &ClientConfig,
    command: &Commands,
) -> Result<(), Box<dyn std::error::Error>> {
    let decimals = config.contracts.stablecoin_decimals;
    let symbol = &config.contracts.stablecoin_symbol;

    match command {
        Commands::Status => {
            let stats = orchestrator.sale_stats().await?;
            println!("{} ({})", stats.name, stats.symbol);
            println!("  price:      {} {}", stats.price, symbol);
            println!("  sold:       {}", stats.tokens_sold);
            println!("  available:  {}", stats.tokens_available);
            println!("  progress:   {:.2}%", stats.progress_percent);
            println!(
                "  status:     {}",
                if stats.presale_active && stats.stablecoin_payment_enabled {
                    "open"
                } else {
                    "paused"
                }
            );
        }
        Commands::Account => {
            let snapshot = orchestrator.account_snapshot().await?;
            let token = orchestrator.sale_token();
            println!("{}", snapshot.account);
            println!("  {}:  {}", symbol, from_minor_units(snapshot.stablecoin_balance, decimals));
            println!("  allowance:  {}", from_minor_units(snapshot.allowance, decimals));
            println!(
                "  {}:  {}",
                token.symbol,
                from_minor_units(snapshot.token_balance, token.decimals)
            );
        }
        Commands::Quote { amount } => {
            let quote = orchestrator.quote(*amount).await?;
            println!("{} tokens cost {} {}", quote.token_amount, quote.cost, symbol);
            println!("  readiness:  {:?}", quote.readiness);
            if let Some(short) = quote.shortfall(decimals) {
                println!("  short by:   {} {}", short, symbol);
            }
        }
        Commands::Buy(args) => buy(orchestrator, args, decimals).await?,
        Commands::AddToken => {
            let accepted = orchestrator.register_sale_token().await?;
            println!("{}", if accepted { "Token added to wallet" } else { "Token not added" });
        }
        Commands::Simulate(_) => return simulate(config.clone(), command).await,
    }
    Ok(())
}

async fn buy(
    orchestrator: &PurchaseOrchestrator,
    args: &BuyArgs,
    decimals: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; cancelling if nothing was submitted yet");
            on_interrupt.cancel();
        }
    });

    let result = orchestrator.buy_with_cancel(args.request(), &cancel).await;
    interrupt.abort();

    match result {
        Ok(outcome) => report(&outcome, decimals),
        Err(e) => {
            if let Some(kind) = e.kind() {
                eprintln!("{}\n{}", kind, kind.guidance());
            } else {
                eprintln!("{}", e);
            }
            return Err(e.into());
        }
    }
    Ok(())
}

fn report(outcome: &PurchaseOutcome, decimals: u8) {
    match outcome {
        PurchaseOutcome::Completed(receipt) => {
            println!(
                "Bought {} tokens for {} in block {} (tx {})",
                receipt.token_amount,
                from_minor_units(receipt.payment, decimals),
                receipt.block_number,
                receipt.purchase_tx
            );
        }
        PurchaseOutcome::StillPending { stage, tx_hash, .. } => {
            println!("The {} transaction {} is still pending; check it later.", stage, tx_hash);
        }
        PurchaseOutcome::SettlementPending {
            expected_increment,
            observed_increment,
        } => {
            println!(
                "The fiat purchase has not settled yet ({} of {} received). \
                 Once it arrives, buy with the direct option.",
                from_minor_units(*observed_increment, decimals),
                from_minor_units(*expected_increment, decimals)
            );
        }
    }
}

/// Funded in-memory ledger starting off the target chain, and an orchestrator over it.
fn simulation(
    mut config: ClientConfig,
    fiat: bool,
) -> Result<(InMemoryLedger, PurchaseOrchestrator, ClientConfig), ConfigError> {
    let ledger = InMemoryLedger::builder()
        .chain(ChainId(1))
        .stablecoin_balance(if fiat {
            U256::ZERO
        } else {
            U256::from(1_000_000_000_000u64)
        })
        .build();
    config.contracts.sale_address = ledger.sale_contract().to_string();
    config.purchase.receipt_poll_interval_ms = 50;
    config.fiat.poll_base_ms = 50;

    let onramp = Arc::new(SimulatedOnramp::settling(ledger.clone(), Duration::from_millis(200)));
    let orchestrator = PurchaseOrchestrator::new(Arc::new(ledger.clone()), &config, onramp)?;
    Ok((ledger, orchestrator, config))
}

/// Full flow against the simulated ledger.
async fn simulate(config: ClientConfig, command: &Commands) -> Result<(), Box<dyn std::error::Error>> {
    let Commands::Simulate(args) = command else {
        return Ok(());
    };
    let (ledger, orchestrator, config) = simulation(config, args.fiat)?;
    let _enforcer = session_enforcer(&orchestrator, command);

    let stats = orchestrator.sale_stats().await?;
    println!("Simulated sale: {} at {} per token", stats.name, stats.price);

    buy(&orchestrator, args, config.contracts.stablecoin_decimals).await?;

    for submission in ledger.submissions() {
        println!("  submitted: {:?}", submission);
    }
    println!("  progress:  {:.2}%", orchestrator.sale_progress().await?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_command() -> Commands {
        Commands::Buy(BuyArgs {
            amount: U256::from(1000u64),
            fiat: false,
        })
    }

    #[test]
    fn test_only_wallet_commands_hold_the_chain() {
        assert!(buy_command().uses_wallet());
        assert!(Commands::AddToken.uses_wallet());
        assert!(!Commands::Status.uses_wallet());
        assert!(!Commands::Quote {
            amount: U256::from(1u64)
        }
        .uses_wallet());
    }

    #[tokio::test]
    async fn test_wallet_session_returns_wallet_to_target() {
        let (ledger, orchestrator, _) = simulation(ClientConfig::default(), false).unwrap();
        assert!(session_enforcer(&orchestrator, &Commands::Status).is_none());
        let _enforcer = session_enforcer(&orchestrator, &buy_command());

        ledger.set_wallet_chain(ChainId(1));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while ledger.chain_id().await.unwrap() != ChainId(8453) {
            assert!(tokio::time::Instant::now() < deadline, "wallet was not switched back");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ledger.switch_requests(), vec![ChainId(8453)]);
    }
}
