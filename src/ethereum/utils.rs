use alloy::{
    eips::{BlockId, BlockNumberOrTag},
    primitives::{Address, U256},
    signers::local::PrivateKeySigner,
    sol_types::{Panic, Revert, SolError},
    transports::TransportError,
};
use anyhow::{anyhow, Result};
use std::str::FromStr;

use crate::error::BindingError;

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    let Some(hex_part) = address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) else {
        return Err(anyhow!(
            "Invalid address format: '{}'. Ethereum addresses must start with '0x'",
            address
        ));
    };

    if hex_part.len() != 40 {
        return Err(anyhow!(
            "Invalid address length: '{}'. Ethereum addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        ));
    }

    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        ));
    }

    Address::from_str(address)
        .map_err(|e| anyhow!("Invalid Ethereum address: '{}'. Error: {}", address, e))
}

/// Validates network name
pub fn validate_network(network: &str, available_networks: &[String]) -> Result<()> {
    if network.is_empty() {
        return Err(anyhow!("Network name cannot be empty"));
    }

    if !available_networks.iter().any(|n| n == network) {
        return Err(anyhow!(
            "Unknown network: '{}'. Available networks: {}",
            network,
            available_networks.join(", ")
        ));
    }

    Ok(())
}

/// Parses a wei amount given in decimal or `0x` hex
pub fn validate_hex_value(value_str: &str) -> Result<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(anyhow!("Value cannot be empty"));
    }

    if let Some(hex) = value_str.strip_prefix("0x").or_else(|| value_str.strip_prefix("0X")) {
        U256::from_str_radix(hex, 16).map_err(|_| anyhow!("Invalid hexadecimal value: '{}'", value_str))
    } else {
        U256::from_str(value_str).map_err(|_| {
            anyhow!(
                "Invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                value_str
            )
        })
    }
}

/// Parses a block reference: a number or one of `latest`, `pending`,
/// `earliest`, `safe`, `finalized`
pub fn parse_block(block: &str) -> Result<BlockId> {
    let tag = match block.trim().to_ascii_lowercase().as_str() {
        "latest" => BlockNumberOrTag::Latest,
        "pending" => BlockNumberOrTag::Pending,
        "earliest" => BlockNumberOrTag::Earliest,
        "safe" => BlockNumberOrTag::Safe,
        "finalized" => BlockNumberOrTag::Finalized,
        other => BlockNumberOrTag::Number(parse_block_number(other)?),
    };
    Ok(BlockId::Number(tag))
}

pub fn parse_block_number(block: &str) -> Result<u64> {
    let block = block.trim();
    let parsed = match block.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => block.parse::<u64>(),
    };
    parsed.map_err(|_| anyhow!("Invalid block number: '{}'", block))
}

/// Parses a hex private key, with or without `0x`
pub fn parse_private_key(private_key: &str) -> Result<PrivateKeySigner> {
    let private_key = private_key.trim();
    let private_key = private_key.strip_prefix("0x").unwrap_or(private_key);

    PrivateKeySigner::from_str(private_key).map_err(|e| anyhow!("Invalid private key: {}", e))
}

/// Maps a node error onto the binding error kinds.
///
/// Reverts are recognised from the structured error response; the revert
/// data is decoded when present, otherwise the reason embedded in the
/// message is used.
pub fn classify_rpc_error(error: &TransportError) -> BindingError {
    match error.as_error_resp() {
        Some(payload) if payload.message.contains("revert") => {
            let reason = payload
                .as_revert_data()
                .and_then(|data| revert_reason(&data))
                .or_else(|| message_reason(&payload.message));
            BindingError::ExecutionReverted(reason)
        }
        Some(payload) => BindingError::Transport(interpret_rpc_error(&payload.message)),
        None => BindingError::Transport(interpret_rpc_error(&error.to_string())),
    }
}

/// Reason carried by revert data.
///
/// `Error(string)` yields its message and `Panic(uint256)` its kind. Any other
/// payload is a custom error and is returned as `0x`-prefixed hex so a caller
/// holding the interface can decode it.
pub fn revert_reason(data: &[u8]) -> Option<String> {
    if data.is_empty() {
        return None;
    }
    if let Ok(revert) = Revert::abi_decode(data, false) {
        return Some(revert.reason);
    }
    if let Ok(panic) = Panic::abi_decode(data, false) {
        return Some(panic.to_string());
    }
    Some(format!("0x{}", hex::encode(data)))
}

fn message_reason(message: &str) -> Option<String> {
    const MARKER: &str = "execution reverted";

    let start = message.find(MARKER)?;
    let reason = message[start + MARKER.len()..].trim_start_matches(':').trim();
    (!reason.is_empty()).then(|| reason.to_string())
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    if error.contains("execution reverted") {
        format!(
            "Transaction failed: The contract function reverted execution. {}",
            if error.contains("revert") {
                "This usually means the function's requirements were not met or an assertion failed."
            } else {
                "Check your parameters and try again."
            }
        )
    } else if error.contains("insufficient funds") {
        "Transaction failed: Insufficient funds to cover gas costs. Make sure your account has enough ETH for gas fees.".to_string()
    } else if error.contains("gas required exceeds allowance") {
        "Transaction failed: Gas limit too low. Try increasing the gas limit for this transaction."
            .to_string()
    } else if error.contains("nonce too low") {
        "Transaction failed: Nonce too low. This usually means another transaction was already mined with this nonce.".to_string()
    } else if error.contains("replacement transaction underpriced") {
        "Transaction failed: Gas price too low to replace pending transaction. Increase the gas price.".to_string()
    } else if error.contains("filter not found") {
        "Subscription error: The node dropped the log filter. It may have expired or the node restarted.".to_string()
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Network error: Cannot connect to RPC endpoint. Check your internet connection and RPC URL configuration.".to_string()
    } else if error.contains("timeout") {
        "Network error: Request timed out. The RPC endpoint may be overloaded or unreachable."
            .to_string()
    } else if error.contains("rate limit") {
        "Rate limit error: Too many requests to the RPC endpoint. Try again in a few moments or use a different endpoint.".to_string()
    } else if error.contains("method not found") {
        "RPC error: The requested method is not supported by this RPC endpoint. Try using a different endpoint.".to_string()
    } else {
        format!("RPC error: {}", error)
    }
}

/// Creates user-friendly error messages for ABI-related errors
pub fn interpret_abi_error(error: &str, contract_address: &str) -> String {
    if error.contains("404") || error.contains("not found") || error.contains("not verified") {
        format!(
            "Contract verification not found: The contract at {} is not verified on the explorer. Provide an artifact file instead.",
            contract_address
        )
    } else if error.contains("rate limit") || error.contains("429") {
        "API rate limit: Too many requests to the explorer API. Try again in a few moments or provide your own ETHERSCAN_API_KEY.".to_string()
    } else if error.contains("invalid API key") || error.contains("403") {
        "API authentication error: Invalid explorer API key. Check your ETHERSCAN_API_KEY environment variable.".to_string()
    } else if error.contains("network") || error.contains("connection") {
        "Network error: Cannot connect to the explorer API. Check your internet connection."
            .to_string()
    } else if error.contains("timeout") {
        "Timeout error: Request to the explorer API timed out. Try again in a few moments.".to_string()
    } else {
        format!("ABI resolution error: {}", error)
    }
}
