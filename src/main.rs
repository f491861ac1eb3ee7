use std::{path::Path, sync::Arc};

use alloy::{json_abi::JsonAbi, primitives::U256};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use contract_actions::{
    abi::{select_function, ArgumentShape, Selection},
    actions::{
        prepare_write_contract, read_contract, wait_for_transaction, watch_contract_event,
        watch_read_contract, write_contract, ContractCallConfig, PrepareWriteContractResult,
        WatchContractEventConfig, WatchReadOptions, WriteContractConfig,
    },
    client::Client,
    config::Config,
    contract::{AddressOrName, CallOverrides, EventListener},
    error::ContractError,
    ethereum::{
        abi::{load_abi_file, AbiResolver, AbiSource},
        parse_value,
        provider::ProviderManager,
        signer::LocalConnector,
        utils::{
            describe_functions, interpret_abi_error, interpret_rpc_error, missing_member_hint,
            validate_function_name, validate_network,
        },
    },
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

fn target_args(member: &'static str, help: &'static str) -> [Arg; 3] {
    [
        Arg::new("address")
            .short('a')
            .long("address")
            .value_name("ADDRESS")
            .required(true)
            .help("Contract address or ENS name"),
        Arg::new(member)
            .short('f')
            .long(member)
            .value_name("NAME")
            .required(true)
            .help(help),
        Arg::new("abi")
            .long("abi")
            .value_name("FILE")
            .help("ABI JSON file; fetched from the block explorer when omitted"),
    ]
}

fn call_args() -> [Arg; 4] {
    [
        Arg::new("args")
            .long("args")
            .value_name("JSON")
            .help("Arguments as JSON: a value, an array, or an object keyed by parameter name"),
        Arg::new("value")
            .long("value")
            .value_name("WEI")
            .help("Native value to send, decimal or 0x hex"),
        Arg::new("gas-limit")
            .long("gas-limit")
            .value_name("GAS")
            .value_parser(clap::value_parser!(u64))
            .help("Gas limit; estimated when omitted"),
        Arg::new("block")
            .long("block")
            .value_name("NUMBER")
            .value_parser(clap::value_parser!(u64))
            .help("Block to read at"),
    ]
}

fn cli() -> Command {
    Command::new("contract-actions")
        .version("0.1.0")
        .about("Read, prepare, write and watch Ethereum smart contracts")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("network")
                .short('n')
                .long("network")
                .value_name("NETWORK")
                .global(true)
                .help("Network to use (ethereum, sepolia, polygon, arbitrum)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("RPC endpoint URL"),
        )
        .arg(
            Arg::new("allow-writes")
                .long("allow-writes")
                .global(true)
                .help("Allow write operations (transactions)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("read")
                .about("Call a view function")
                .args(target_args("function", "Function name or signature"))
                .args(call_args()),
        )
        .subcommand(
            Command::new("prepare")
                .about("Build and gas-estimate a write without sending it")
                .args(target_args("function", "Function name or signature"))
                .args(call_args()),
        )
        .subcommand(
            Command::new("write")
                .about("Send a transaction")
                .args(target_args("function", "Function name or signature"))
                .args(call_args())
                .arg(
                    Arg::new("wait")
                        .long("wait")
                        .help("Wait for the receipt")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("watch-event")
                .about("Print contract events until interrupted")
                .args(target_args("event", "Event name"))
                .arg(
                    Arg::new("once")
                        .long("once")
                        .help("Stop after the first event")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("watch-read")
                .about("Re-run a read whenever the provider changes or a block arrives")
                .args(target_args("function", "Function name or signature"))
                .args(call_args())
                .arg(
                    Arg::new("blocks")
                        .long("blocks")
                        .help("Re-read on every new block")
                        .action(clap::ArgAction::SetTrue),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = cli().get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let mut config = Config::load_or_default(config_path).await;

    if let Some(network) = matches.get_one::<String>("network") {
        validate_network(network, &config.available_networks())?;
        config.default_network = network.clone();
    }

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        if let Some(network_config) = config.networks.get_mut(&config.default_network) {
            network_config.rpc_url = rpc_url.clone();
        }
    }

    if matches.get_flag("allow-writes") {
        config.security.allow_write_operations = true;
    }

    let Some((command, args)) = matches.subcommand() else {
        cli().print_help()?;
        return Ok(());
    };

    info!("Network: {}", config.default_network);
    let manager = ProviderManager::new(config.clone());
    manager.validate_network_connection(None).await?;
    let client = manager.build_client().await?;

    let result = match command {
        "read" => read(&client, &config, args).await,
        "prepare" => prepare(&client, &config, args).await,
        "write" => write(&client, &config, args).await,
        "watch-event" => watch_event(&client, &config, args).await,
        "watch-read" => watch_read(&client, &config, args).await,
        other => Err(anyhow!("Unknown command '{}'", other)),
    };

    if let Err(e) = &result {
        error!("{}", e);
        if let Some(hint) = interpret_rpc_error(&e.to_string()) {
            error!("Hint: {}", hint);
        }
    }
    result
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_abi(args: &ArgMatches, address: &AddressOrName, chain_id: u64) -> Result<Arc<JsonAbi>> {
    if let Some(path) = args.get_one::<String>("abi") {
        return Ok(Arc::new(load_abi_file(Path::new(path)).await?));
    }
    let AddressOrName::Address(address) = address else {
        bail!("--abi is required when the contract is given by ENS name");
    };
    let address = address.to_checksum(None);
    AbiResolver::new(AbiSource::default())
        .get_abi(&address, chain_id)
        .await
        .map_err(|e| anyhow!(interpret_abi_error(&e.to_string(), &address)))
}

/// Shapes `--args` against the function it most likely targets.
fn parse_args(abi: &JsonAbi, function_name: &str, raw: Value) -> Result<ArgumentShape> {
    let arity = match &raw {
        Value::Null => 0,
        Value::Array(items) => items.len(),
        _ => 1,
    };
    let selected = match select_function(abi, function_name, None) {
        Selection::Ambiguous(_) => select_function(abi, function_name, Some(arity)),
        selection => selection,
    };
    match selected.found() {
        Some(shape) => Ok(ArgumentShape::from_json(raw, shape.function)?),
        None => Ok(match raw {
            Value::Null => ArgumentShape::Empty,
            Value::Array(items) => ArgumentShape::collapse(items),
            other => ArgumentShape::Single(other),
        }),
    }
}

async fn call_config(config: &Config, args: &ArgMatches) -> Result<ContractCallConfig> {
    let (_, network) = config.network(None)?;
    let address: AddressOrName = args
        .get_one::<String>("address")
        .ok_or_else(|| anyhow!("--address is required"))?
        .parse()?;
    let function_name = args
        .get_one::<String>("function")
        .ok_or_else(|| anyhow!("--function is required"))?;
    validate_function_name(function_name)?;

    let abi = load_abi(args, &address, network.chain_id).await?;
    let raw = match args.get_one::<String>("args") {
        Some(json) => serde_json::from_str(json).context("--args must be valid JSON")?,
        None => Value::Null,
    };
    let call_args = parse_args(&abi, function_name, raw)?;

    let overrides = CallOverrides {
        value: args
            .get_one::<String>("value")
            .map(|v| parse_value(v))
            .transpose()?,
        gas_limit: args.get_one::<u64>("gas-limit").copied(),
        block_number: args.get_one::<u64>("block").copied(),
        ..Default::default()
    };

    Ok(ContractCallConfig::new(address, abi, function_name.clone())
        .args(call_args)
        .chain_id(network.chain_id)
        .overrides(overrides))
}

async fn connect(client: &Client, config: &Config) -> Result<()> {
    let private_key = Config::private_key()
        .ok_or_else(|| anyhow!("PRIVATE_KEY must be set to sign transactions"))?;
    let connector = LocalConnector::new(&private_key, config)?;
    let (_, network) = config.network(None)?;
    client.connect(Arc::new(connector), Some(network.chain_id)).await?;
    Ok(())
}

fn check_write_allowed(config: &Config, call: &ContractCallConfig) -> Result<()> {
    if !config.security.allow_write_operations {
        bail!("Write operations are disabled. Pass --allow-writes or set security.allow_write_operations");
    }
    let value = call
        .overrides
        .as_ref()
        .and_then(|o| o.value)
        .unwrap_or(U256::ZERO);
    if let Some(max) = &config.security.max_transaction_value {
        let max = parse_value(max).context("security.max_transaction_value is not a number")?;
        if value > max {
            bail!("Value {} exceeds the configured maximum of {}", value, max);
        }
    }
    Ok(())
}

/// Appends what the ABI offers to a failed member lookup.
fn with_abi_hint(error: ContractError, abi: &JsonAbi) -> anyhow::Error {
    match missing_member_hint(&error, abi) {
        Some(hint) => anyhow!("{}\n{}", error, hint),
        None => error.into(),
    }
}

/// Prepares a write priced within the network's gas settings.
async fn prepare_priced(
    client: &Client,
    config: &Config,
    mut call: ContractCallConfig,
) -> Result<PrepareWriteContractResult> {
    let (_, network) = config.network(None)?;
    network
        .gas
        .apply_defaults(call.overrides.get_or_insert_with(CallOverrides::default));
    let prepared = prepare_write_contract(client, &call, None)
        .await
        .map_err(|e| with_abi_hint(e, &call.abi))?;
    network.gas.check(&prepared.request)?;
    Ok(prepared)
}

async fn read(client: &Client, config: &Config, args: &ArgMatches) -> Result<()> {
    let call = call_config(config, args).await?;
    match read_contract(client, &call).await? {
        Some(output) => print_json(&output.normalize().into_value()),
        None => {
            warn!("The ABI has {}", describe_functions(&call.abi));
            print_json(&Value::Null)
        }
    }
}

async fn prepare(client: &Client, config: &Config, args: &ArgMatches) -> Result<()> {
    let call = call_config(config, args).await?;
    connect(client, config).await?;
    let prepared = prepare_priced(client, config, call).await?;
    print_json(&prepared)
}

async fn write(client: &Client, config: &Config, args: &ArgMatches) -> Result<()> {
    let call = call_config(config, args).await?;
    check_write_allowed(config, &call)?;
    connect(client, config).await?;

    let prepared = prepare_priced(client, config, call).await?;
    let sent = write_contract(client, WriteContractConfig::prepared(prepared.request)).await?;
    print_json(&sent)?;

    if args.get_flag("wait") {
        let receipt = wait_for_transaction(
            client,
            &sent,
            config.watch.confirmations,
            config.watch.poll_interval(),
        )
        .await?;
        if !receipt.status {
            warn!("Transaction {} reverted", receipt.hash);
        }
        print_json(&receipt)?;
    }
    Ok(())
}

async fn watch_event(client: &Client, config: &Config, args: &ArgMatches) -> Result<()> {
    let (_, network) = config.network(None)?;
    let address: AddressOrName = args
        .get_one::<String>("address")
        .ok_or_else(|| anyhow!("--address is required"))?
        .parse()?;
    let event_name = args
        .get_one::<String>("event")
        .ok_or_else(|| anyhow!("--event is required"))?;
    let abi = load_abi(args, &address, network.chain_id).await?;

    let mut watch = WatchContractEventConfig::new(address, abi.clone(), event_name.clone());
    watch.chain_id = Some(network.chain_id);
    watch.once = args.get_flag("once");

    let listener: EventListener = Arc::new(|event| {
        let line = json!({
            "event": event.name,
            "args": event.named,
            "blockNumber": event.log.block_number,
            "transactionHash": event.log.transaction_hash,
        });
        println!("{}", line);
    });
    let unwatch = watch_contract_event(client, watch, listener)
        .await
        .map_err(|e| with_abi_hint(e, &abi))?;
    info!("Watching {} events, press Ctrl-C to stop", event_name);

    tokio::signal::ctrl_c().await?;
    unwatch.unwatch();
    Ok(())
}

async fn watch_read(client: &Client, config: &Config, args: &ArgMatches) -> Result<()> {
    let call = call_config(config, args).await?;
    let options = WatchReadOptions {
        listen_to_block: args.get_flag("blocks"),
        poll_interval: config.watch.poll_interval(),
    };

    let unwatch = watch_read_contract(client, call, options, |result| match result {
        Ok(Some(shape)) => println!("{}", shape.into_value()),
        Ok(None) => println!("null"),
        Err(e) => warn!("Read failed: {}", e),
    });
    info!("Watching read, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    unwatch.unwatch();
    Ok(())
}
