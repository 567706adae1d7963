use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use paymee::amount::{format_units, group_digits};
use paymee::balance::BalanceReader;
use paymee::checkout::{pay_link, PaymentRoute};
use paymee::config::Config;
use paymee::contracts::OftBridge;
use paymee::payment_link::{JsonFileLinkStore, PaymentLink, PaymentLinkStore};
use paymee::rpc::{Connector, HttpConnector};
use paymee::{Address, Error, SendOrchestrator, SendReceipt, SendRequest, SendResult};

/// PayMee cross-chain payments over LayerZero OFT bridges.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file; built-in testnets when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bridge tokens to another chain
    Send(SendArgs),
    /// Show native and token balances of an address
    Balance {
        #[arg(long)]
        eid: u32,
        #[arg(long)]
        address: Address,
        /// Also show the allowance granted to this spender
        #[arg(long)]
        spender: Option<Address>,
    },
    /// Show a bridge's owner and its peers on the other configured chains
    Peers {
        #[arg(long)]
        eid: u32,
        /// Inspect this bridge instead of the registry's
        #[arg(long)]
        bridge: Option<Address>,
    },
    /// Pay a stored payment link
    Pay {
        id: Uuid,
        #[arg(long, default_value_t = 40161)]
        from: u32,
        #[arg(long, default_value_t = 11155420)]
        to: u32,
    },
    /// Manage payment links
    #[command(subcommand)]
    Link(LinkCommand),
}

#[derive(Args)]
struct SendArgs {
    #[arg(long)]
    from: u32,
    #[arg(long)]
    to: u32,
    /// Decimal amount, e.g. 0.01
    #[arg(long)]
    amount: String,
    #[arg(long)]
    recipient: String,
    #[arg(long)]
    min_amount: Option<String>,
    /// Bridge to use instead of the registry's
    #[arg(long)]
    bridge: Option<Address>,
    /// Hex compose message
    #[arg(long)]
    compose_msg: Option<String>,
    /// Receive options as gas,value[,gas,value...]
    #[arg(long, value_delimiter = ',')]
    receive: Vec<String>,
    /// Compose options as index,gas,value[,...]
    #[arg(long, value_delimiter = ',')]
    compose: Vec<String>,
    /// Native drops as amount_wei,recipient[,...]
    #[arg(long, value_delimiter = ',')]
    native_drop: Vec<String>,
}

#[derive(Subcommand)]
enum LinkCommand {
    /// Create a pending payment link
    Create {
        #[arg(long)]
        amount: String,
        #[arg(long)]
        concept: String,
        #[arg(long)]
        client: String,
        #[arg(long)]
        recipient: String,
    },
    /// List stored payment links
    List,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::testnets(),
    };
    let registry = Arc::new(config.registry());
    let connector: Arc<dyn Connector> =
        Arc::new(HttpConnector::new(config.private_key()?, config.rpc_timeout())?);
    let orchestrator = SendOrchestrator::new(registry.clone(), connector.clone())
        .with_settings(config.send_settings());

    match cli.command {
        Command::Send(args) => {
            let mut request = SendRequest::new(args.from, args.to, args.amount, args.recipient)
                .with_flat_options(
                    args.receive.as_slice(),
                    args.compose.as_slice(),
                    args.native_drop.as_slice(),
                )?;
            if let Some(min) = args.min_amount {
                request = request.with_min_amount(min);
            }
            if let Some(bridge) = args.bridge {
                request = request.with_bridge(bridge);
            }
            if let Some(msg) = args.compose_msg {
                let bytes = hex::decode(msg.trim_start_matches("0x")).map_err(|e| {
                    Error::InvalidRequest(format!("compose message is not hex: {e}"))
                })?;
                request = request.with_compose_message(bytes);
            }

            report(orchestrator.send(&request).await)?;
        }
        Command::Balance { eid, address, spender } => {
            let reader = BalanceReader::new(registry.clone(), connector.clone());
            let native = reader.native_balance(address, eid).await?;
            let tokens = reader.token_balance(address, eid).await?;
            let decimals = reader.token_decimals(eid).await?;
            println!("chain:   {} ({eid})", registry.name(eid));
            println!("native:  {} ({} wei)", format_units(&native, 18), group_digits(&native));
            println!(
                "token:   {} ({} units)",
                format_units(&tokens, decimals),
                group_digits(&tokens)
            );
            if let Some(spender) = spender {
                let allowance = reader.allowance(address, spender, eid).await?;
                println!("allowed: {} to {spender}", format_units(&allowance, decimals));
            }
        }
        Command::Peers { eid, bridge } => {
            let endpoint = registry.endpoint(eid)?;
            let bridge_address = match bridge {
                Some(address) => address,
                None => registry.bridge_address(eid)?,
            };
            let client = connector.connect(endpoint)?;
            let bridge = OftBridge::new(client.as_ref(), bridge_address);
            println!("bridge {bridge_address} on {}", endpoint.name);
            match bridge.owner().await {
                Ok(owner) => println!("owner  {owner}"),
                Err(e) => println!("owner  unavailable ({e})"),
            }
            for entry in registry.iter().filter(|e| e.endpoint.eid != eid) {
                let peer = bridge.peer(entry.endpoint.eid).await?;
                let shown = peer
                    .map(|w| Address::from_bytes32(&w).to_string())
                    .unwrap_or_else(|| "not set".to_string());
                println!("peer   {:>8} {:<20} {shown}", entry.endpoint.eid, entry.endpoint.name);
            }
        }
        Command::Pay { id, from, to } => {
            let store = JsonFileLinkStore::new(&config.links.store_path);
            report(pay_link(&store, &orchestrator, id, PaymentRoute::new(from, to)).await)?;
        }
        Command::Link(LinkCommand::Create {
            amount,
            concept,
            client,
            recipient,
        }) => {
            let store = JsonFileLinkStore::new(&config.links.store_path);
            let link = PaymentLink::new(amount, concept, client, &recipient)?;
            store.insert(link.clone()).await?;
            println!("{}", link.pay_url(&config.links.base_url));
        }
        Command::Link(LinkCommand::List) => {
            let store = JsonFileLinkStore::new(&config.links.store_path);
            for link in store.list().await? {
                println!(
                    "{}  {:<8} {:>12}  {}  {}",
                    link.id,
                    link.status.to_string(),
                    link.amount,
                    link.client_name,
                    link.concept
                );
            }
        }
    }
    Ok(())
}

/// Print the outcome as a JSON `SendResult`, keeping the error for the exit code.
fn report(outcome: Result<SendReceipt, Error>) -> Result<(), Error> {
    match outcome {
        Ok(receipt) => {
            if let Some(guid) = &receipt.guid {
                eprintln!("message guid: {guid}");
            }
            print_json(&SendResult::from(Ok(receipt)))
        }
        Err(e) => {
            print_json(&SendResult {
                success: false,
                error_message: Some(e.to_string()),
                ..SendResult::default()
            })?;
            Err(e)
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| Error::InvalidRequest(format!("cannot render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}
