use alloy::{
    dyn_abi::DynSolValue,
    json_abi::{EventParam, Function, Param},
};
use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use contract_bind::{
    config::Config,
    ethereum::{
        artifact::{Artifact, ArtifactResolver, ArtifactSource},
        codec,
        contract::{ContractHandle, EventFilter},
        deploy::Deployer,
        json,
        provider::ProviderManager,
        transport::Transport,
        utils, CallOptions, TransactOptions,
    },
    BindingError,
};

pub fn cli() -> Command {
    let contract = Arg::new("contract")
        .value_name("CONTRACT")
        .required(true)
        .help("Registered contract name or address");
    let abi = Arg::new("abi")
        .long("abi")
        .value_name("FILE")
        .help("ABI or compiler artifact file (otherwise the registry or the explorer is used)");
    let args = Arg::new("args")
        .short('a')
        .long("args")
        .value_name("JSON")
        .help("Arguments as a JSON array or an object keyed by parameter name");
    let yes = Arg::new("yes")
        .short('y')
        .long("yes")
        .help("Skip the confirmation prompt")
        .action(ArgAction::SetTrue);

    Command::new("contract-bind")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Typed calls, transactions, events and deployments for EVM contracts")
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
                .help("Allow write operations (transactions and deployments)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("call")
                .about("Call a read-only function")
                .arg(contract.clone())
                .arg(Arg::new("function").required(true).help("Function name or signature"))
                .arg(args.clone())
                .arg(abi.clone())
                .arg(Arg::new("block").long("block").value_name("BLOCK").help("Block number or tag"))
                .arg(Arg::new("from").long("from").value_name("ADDRESS").help("Caller address")),
        )
        .subcommand(
            Command::new("send")
                .about("Send a transaction (signs with PRIVATE_KEY)")
                .arg(contract.clone())
                .arg(Arg::new("function").required(true).help("Function name or signature"))
                .arg(args.clone())
                .arg(abi.clone())
                .arg(Arg::new("value").long("value").value_name("WEI").help("Wei to attach"))
                .arg(Arg::new("gas-limit").long("gas-limit").value_name("GAS").value_parser(clap::value_parser!(u64)))
                .arg(Arg::new("gas-price").long("gas-price").value_name("WEI"))
                .arg(Arg::new("nonce").long("nonce").value_parser(clap::value_parser!(u64)))
                .arg(yes.clone()),
        )
        .subcommand(
            Command::new("logs")
                .about("Query historical events")
                .arg(contract.clone())
                .arg(Arg::new("event").required(true).help("Event name or signature"))
                .arg(Arg::new("from-block").long("from-block").value_name("BLOCK"))
                .arg(Arg::new("to-block").long("to-block").value_name("BLOCK"))
                .arg(
                    Arg::new("topic")
                        .long("topic")
                        .value_name("JSON")
                        .action(ArgAction::Append)
                        .help("Accepted values for the next indexed parameter, as a JSON array (repeatable)"),
                )
                .arg(abi.clone()),
        )
        .subcommand(
            Command::new("watch")
                .about("Stream events as they are emitted, until Ctrl-C")
                .arg(contract)
                .arg(Arg::new("event").required(true).help("Event name or signature"))
                .arg(
                    Arg::new("topic")
                        .long("topic")
                        .value_name("JSON")
                        .action(ArgAction::Append)
                        .help("Accepted values for the next indexed parameter, as a JSON array (repeatable)"),
                )
                .arg(abi),
        )
        .subcommand(
            Command::new("deploy")
                .about("Deploy a contract from a compiler artifact (signs with PRIVATE_KEY)")
                .arg(Arg::new("artifact").required(true).value_name("FILE"))
                .arg(args)
                .arg(Arg::new("value").long("value").value_name("WEI").help("Wei to attach"))
                .arg(Arg::new("gas-limit").long("gas-limit").value_name("GAS").value_parser(clap::value_parser!(u64)))
                .arg(yes),
        )
        .subcommand(
            Command::new("selectors")
                .about("Print the selector table of an ABI or artifact file")
                .arg(Arg::new("artifact").required(true).value_name("FILE")),
        )
}

/// Executes subcommands against the configured networks
#[derive(Debug)]
pub struct CommandRunner {
    config: Config,
    providers: ProviderManager,
    artifacts: ArtifactResolver,
    network: Option<String>,
    /// `--rpc-url`, applied to whichever network a command resolves
    rpc_url: Option<String>,
}

/// A contract resolved from the command line
struct Target {
    handle: ContractHandle,
    network: String,
}

impl CommandRunner {
    pub fn new(config: Config, network: Option<String>) -> Result<Self> {
        if let Some(network) = &network {
            let available: Vec<String> = config.networks.keys().cloned().collect();
            utils::validate_network(network, &available)?;
        }
        let providers = ProviderManager::new(config.clone())?;

        Ok(Self {
            config,
            providers,
            artifacts: ArtifactResolver::new(ArtifactSource::default()),
            network,
            rpc_url: None,
        })
    }

    pub fn with_rpc_url(mut self, rpc_url: Option<String>) -> Self {
        self.rpc_url = rpc_url;
        self
    }

    pub async fn run(&mut self, matches: &ArgMatches) -> Result<Value> {
        match matches.subcommand() {
            Some(("call", sub)) => self.call(sub).await,
            Some(("send", sub)) => self.send(sub).await,
            Some(("logs", sub)) => self.logs(sub).await,
            Some(("watch", sub)) => self.watch(sub).await,
            Some(("deploy", sub)) => self.deploy(sub).await,
            Some(("selectors", sub)) => selectors(sub).await,
            _ => Err(anyhow!("No command given. Run with --help for usage.")),
        }
    }

    fn transport(&mut self, network: &str) -> Result<Arc<dyn Transport>> {
        if let Some(rpc_url) = &self.rpc_url {
            self.providers.override_endpoint(network, rpc_url)?;
        }
        let transport: Arc<dyn Transport> = self.providers.get_transport(Some(network))?;
        Ok(transport)
    }

    async fn resolve(&mut self, matches: &ArgMatches) -> Result<Target> {
        let contract = required(matches, "contract")?;
        let abi_file = matches.get_one::<String>("abi");

        let (address, artifact, network) = match self.config.contracts.get(contract).cloned() {
            Some(entry) => {
                let address = entry
                    .address
                    .as_deref()
                    .ok_or_else(|| anyhow!("Contract '{}' has no address in the configuration", contract))?;
                let address = utils::validate_address(address)?;
                let artifact = match abi_file {
                    Some(path) => Artifact::load_file(path).await?,
                    None => Artifact::load_file(&entry.artifact).await?,
                };
                let network = self.network.clone().or(entry.network);
                (address, artifact, network)
            }
            None => {
                let address = utils::validate_address(contract)
                    .map_err(|e| anyhow!("'{}' is neither a registered contract nor an address: {}", contract, e))?;
                let network = self.network.clone();
                let artifact = match abi_file {
                    Some(path) => Artifact::load_file(path).await?,
                    None => self
                        .artifacts
                        .get_artifact(contract, network.as_deref())
                        .await
                        .map_err(|e| anyhow!(utils::interpret_abi_error(&e.to_string(), contract)))?,
                };
                (address, artifact, network)
            }
        };

        let network = network.unwrap_or_else(|| self.config.default_network.clone());
        let interface = Arc::new(artifact.interface()?);
        let transport = self.transport(&network)?;

        Ok(Target {
            handle: ContractHandle::new(address, interface, transport),
            network,
        })
    }

    async fn call(&mut self, matches: &ArgMatches) -> Result<Value> {
        let target = self.resolve(matches).await?;
        let (function, args) = function_and_args(&target.handle, matches)?;

        let mut options = CallOptions::default();
        if let Some(block) = matches.get_one::<String>("block") {
            options = options.at_block(utils::parse_block(block)?);
        }
        if let Some(from) = matches.get_one::<String>("from") {
            options = options.caller(utils::validate_address(from)?);
        }

        let output = target
            .handle
            .call_with(&function.signature(), args, &options)
            .await
            .map_err(|e| anyhow!("{} failed on {}: {}", function.signature(), target.network, e))?;

        Ok(json!({
            "contract": target.handle.address().to_checksum(None),
            "function": function.signature(),
            "result": json::output_to_json(&output),
        }))
    }

    async fn send(&mut self, matches: &ArgMatches) -> Result<Value> {
        self.ensure_writes_allowed()?;
        let target = self.resolve(matches).await?;
        let (function, args) = function_and_args(&target.handle, matches)?;

        let mut options = self.transact_options(matches)?;
        if let Some(gas_price) = matches.get_one::<String>("gas-price") {
            options = options.gas_price(utils::validate_hex_value(gas_price)?.to::<u128>());
        }
        if let Some(nonce) = matches.get_one::<u64>("nonce") {
            options = options.nonce(*nonce);
        }

        self.confirm(
            &format!(
                "Send {} to {} on {}",
                function.signature(),
                target.handle.address(),
                target.network
            ),
            matches,
        )?;

        self.providers.validate_network_connection(Some(&target.network)).await?;
        let pending = target
            .handle
            .transact(&function.signature(), &options, args)
            .await
            .map_err(|e| anyhow!("Failed to send transaction: {}", e))?;

        Ok(json!({
            "hash": format!("{:#x}", pending.hash),
            "from": pending.from.to_checksum(None),
            "to": target.handle.address().to_checksum(None),
            "nonce": pending.nonce,
        }))
    }

    async fn logs(&mut self, matches: &ArgMatches) -> Result<Value> {
        let target = self.resolve(matches).await?;
        let mut filter = event_filter(&target.handle, matches)?;
        if let Some(block) = matches.get_one::<String>("from-block") {
            filter = filter.from_block(utils::parse_block_number(block)?);
        }
        if let Some(block) = matches.get_one::<String>("to-block") {
            filter = filter.to_block(utils::parse_block_number(block)?);
        }

        let mut stream = target.handle.filterer().query(&filter).await?;
        let events = stream.collect_remaining().await?;

        Ok(json!({
            "event": filter.event,
            "count": events.len(),
            "events": events.iter().map(json::event_to_json).collect::<Vec<_>>(),
        }))
    }

    async fn watch(&mut self, matches: &ArgMatches) -> Result<Value> {
        let target = self.resolve(matches).await?;
        let filter = event_filter(&target.handle, matches)?;

        let token = CancellationToken::new();
        let stop = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });

        self.providers.validate_network_connection(Some(&target.network)).await?;
        let filter = filter.with_cancel(token);
        let mut stream = target.handle.filterer().watch(&filter).await?;
        info!("Watching {} on {} (Ctrl-C to stop)", filter.event, target.network);

        let mut delivered = 0usize;
        while stream.next().await {
            if let Some(event) = stream.take_event() {
                delivered += 1;
                println!("{}", json::event_to_json(&event));
            }
        }

        match stream.error() {
            None | Some(BindingError::Cancelled) => Ok(json!({
                "event": filter.event,
                "delivered": delivered,
                "state": format!("{:?}", stream.state()),
            })),
            Some(e) => Err(anyhow!("Watch stopped after {} events: {}", delivered, e)),
        }
    }

    async fn deploy(&mut self, matches: &ArgMatches) -> Result<Value> {
        self.ensure_writes_allowed()?;
        let artifact = Artifact::load_file(required(matches, "artifact")?).await?;
        let deployer = Deployer::from_artifact(&artifact)?;

        let inputs: &[Param] = deployer
            .interface()
            .constructor()
            .map(|c| c.inputs.as_slice())
            .unwrap_or(&[]);
        let args = json::values_from_json(inputs, &json_args(matches)?)?;
        let options = self.transact_options(matches)?;

        let network = self.network.clone().unwrap_or_else(|| self.config.default_network.clone());
        self.confirm(&format!("Deploy {} on {}", required(matches, "artifact")?, network), matches)?;

        let transport = self.transport(&network)?;
        self.providers.validate_network_connection(Some(&network)).await?;
        let deployment = deployer
            .deploy(transport, &options, args)
            .await
            .map_err(|e| anyhow!("Deployment failed: {}", e))?;

        Ok(json!({
            "address": deployment.address.to_checksum(None),
            "hash": format!("{:#x}", deployment.pending.hash),
            "from": deployment.pending.from.to_checksum(None),
            "nonce": deployment.pending.nonce,
            "network": network,
        }))
    }

    fn ensure_writes_allowed(&self) -> Result<()> {
        if !self.config.security.allow_write_operations {
            return Err(anyhow!(
                "Write operations are disabled. Use --allow-writes flag to enable transaction sending."
            ));
        }
        Ok(())
    }

    fn transact_options(&self, matches: &ArgMatches) -> Result<TransactOptions> {
        let private_key = std::env::var("PRIVATE_KEY")
            .map_err(|_| anyhow!("Set PRIVATE_KEY to sign transactions"))?;
        let mut options = TransactOptions::new(utils::parse_private_key(&private_key)?);

        if let Some(value) = matches.get_one::<String>("value") {
            let value = utils::validate_hex_value(value)?;
            if let Some(max) = &self.config.security.max_transaction_value {
                let max = utils::validate_hex_value(max)
                    .map_err(|e| anyhow!("Invalid max_transaction_value in configuration: {}", e))?;
                if value > max {
                    return Err(anyhow!(
                        "Transaction value {} exceeds the configured maximum of {}",
                        value,
                        max
                    ));
                }
            }
            options = options.value(value);
        }
        if let Some(gas_limit) = matches.get_one::<u64>("gas-limit") {
            options = options.gas_limit(*gas_limit);
        }
        Ok(options)
    }

    fn confirm(&self, action: &str, matches: &ArgMatches) -> Result<()> {
        if !self.config.security.require_confirmation || matches.get_flag("yes") {
            return Ok(());
        }

        eprint!("{}? [y/N] ", action);
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if matches!(answer.trim(), "y" | "Y" | "yes") {
            Ok(())
        } else {
            Err(anyhow!("Aborted"))
        }
    }
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("Missing argument '{}'", name))
}

fn json_args(matches: &ArgMatches) -> Result<Value> {
    match matches.get_one::<String>("args") {
        Some(raw) => serde_json::from_str(raw).map_err(|e| anyhow!("--args is not valid JSON: {}", e)),
        None => Ok(Value::Null),
    }
}

/// Resolve the function named on the command line and convert its arguments
fn function_and_args(handle: &ContractHandle, matches: &ArgMatches) -> Result<(Function, Vec<DynSolValue>)> {
    let parameters = json_args(matches)?;
    let arity = match &parameters {
        Value::Array(items) => Some(items.len()),
        Value::Object(map) => Some(map.len()),
        _ => Some(0),
    };

    let function = handle
        .interface()
        .function(required(matches, "function")?, arity)?
        .clone();
    let args = json::values_from_json(&function.inputs, &parameters)?;
    Ok((function, args))
}

fn event_filter(handle: &ContractHandle, matches: &ArgMatches) -> Result<EventFilter> {
    let name = required(matches, "event")?;
    let event = handle.interface().event(name)?;
    let indexed: Vec<&EventParam> = event.inputs.iter().filter(|p| p.indexed).collect();

    let mut filter = EventFilter::new(event.signature());
    for (position, raw) in matches.get_many::<String>("topic").into_iter().flatten().enumerate() {
        let param = indexed.get(position).ok_or_else(|| {
            anyhow!("{} has only {} indexed parameters", event.signature(), indexed.len())
        })?;
        let values: Value = serde_json::from_str(raw)
            .map_err(|e| anyhow!("--topic is not valid JSON: {}", e))?;
        let values = match values {
            Value::Array(items) => items,
            single => vec![single],
        };
        let param = Param {
            ty: param.ty.clone(),
            name: param.name.clone(),
            components: param.components.clone(),
            internal_type: param.internal_type.clone(),
        };
        let params = vec![param; values.len()];
        filter = filter.indexed(json::values_from_json(&params, &Value::Array(values))?);
    }
    Ok(filter)
}

async fn selectors(matches: &ArgMatches) -> Result<Value> {
    let artifact = Artifact::load_file(required(matches, "artifact")?).await?;
    let interface = artifact.interface()?;

    let events: serde_json::Map<String, Value> = interface
        .events()
        .map(|event| {
            (
                format!("{:#x}", codec::event_signature_hash(event)),
                Value::String(event.signature()),
            )
        })
        .collect();

    if artifact.bin().is_none() {
        warn!("Artifact carries no bytecode; it can be called but not deployed");
    }

    Ok(json!({
        "functions": interface.method_table(),
        "events": events,
        "deployable": artifact.bin().is_some(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const POOL_ABI: &str = r#"[
        {"type":"function","name":"poolCount","stateMutability":"view","inputs":[],"outputs":[{"name":"","type":"uint256"}]},
        {"type":"function","name":"transfer","stateMutability":"nonpayable",
         "inputs":[{"name":"to","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[{"name":"","type":"bool"}]},
        {"type":"event","name":"PoolCreated","anonymous":false,"inputs":[
            {"name":"poolId","type":"uint256","indexed":true},
            {"name":"creator","type":"address","indexed":true},
            {"name":"name","type":"string","indexed":false}]}
    ]"#;

    #[test]
    fn test_cli_parses_subcommands() {
        let matches = cli()
            .try_get_matches_from([
                "contract-bind",
                "--network",
                "sepolia",
                "call",
                "pool",
                "getPoolInfo",
                "--args",
                "[1]",
            ])
            .unwrap();
        assert_eq!(matches.get_one::<String>("network").unwrap(), "sepolia");

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "call");
        assert_eq!(sub.get_one::<String>("function").unwrap(), "getPoolInfo");

        assert!(cli().try_get_matches_from(["contract-bind", "send"]).is_err());
    }

    #[tokio::test]
    async fn test_selectors_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(&path, POOL_ABI).unwrap();

        let matches = cli()
            .try_get_matches_from(["contract-bind", "selectors", path.to_str().unwrap()])
            .unwrap();
        let mut runner = CommandRunner::new(Config::default(), None).unwrap();
        let output = runner.run(&matches).await.unwrap();

        assert_eq!(output["functions"]["a9059cbb"], "transfer(address,uint256)");
        assert_eq!(output["deployable"], false);
        assert_eq!(output["events"].as_object().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_writes_refused_by_default() {
        let matches = cli()
            .try_get_matches_from([
                "contract-bind",
                "send",
                "0x5FbDB2315678afecb367f032d93F642f64180aa3",
                "transfer",
            ])
            .unwrap();
        let mut runner = CommandRunner::new(Config::default(), None).unwrap();
        let err = runner.run(&matches).await.unwrap_err();
        assert!(err.to_string().contains("Write operations are disabled"));
    }

    #[tokio::test]
    async fn test_rpc_url_follows_registered_network() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("pool.json");
        std::fs::write(&artifact, POOL_ABI).unwrap();

        let mut config = Config::default();
        config.contracts.insert(
            "pool".to_string(),
            contract_bind::config::ContractEntry {
                artifact,
                address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string()),
                network: Some("sepolia".to_string()),
            },
        );
        let mainnet = config.networks["ethereum"].rpc_url.clone();

        let matches = cli()
            .try_get_matches_from(["contract-bind", "call", "pool", "poolCount"])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let mut runner = CommandRunner::new(config, None)
            .unwrap()
            .with_rpc_url(Some("http://127.0.0.1:8545".to_string()));

        let target = runner.resolve(sub).await.unwrap();
        assert_eq!(target.network, "sepolia");
        assert_eq!(
            runner.providers.get_network_config(Some("sepolia")).unwrap().rpc_url,
            "http://127.0.0.1:8545"
        );
        assert_eq!(
            runner.providers.get_network_config(Some("ethereum")).unwrap().rpc_url,
            mainnet
        );
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(CommandRunner::new(Config::default(), Some("nowhere".to_string())).is_err());
    }
}
