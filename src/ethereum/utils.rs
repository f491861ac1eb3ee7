use alloy::{
    json_abi::JsonAbi,
    primitives::{Address, U256},
};
use anyhow::{anyhow, Result};
use std::str::FromStr;

use crate::{
    abi::{event_names, function_names, MutabilityClass},
    error::ContractError,
};

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    let Some(hex_part) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
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

/// Looks like something ENS could resolve (`vitalik.eth`, `sub.name.xyz`).
pub fn looks_like_ens_name(name: &str) -> bool {
    let name = name.trim();
    name.contains('.')
        && !name.starts_with('.')
        && !name.ends_with('.')
        && !name.split('.').any(str::is_empty)
        && !name.chars().any(char::is_whitespace)
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

/// Validates a function or event name, bare (`mint`) or as a signature
/// (`mint(uint256)`).
pub fn validate_function_name(function_name: &str) -> Result<()> {
    let (name, params) = match function_name.find('(') {
        Some(open) => (&function_name[..open], Some(&function_name[open..])),
        None => (function_name, None),
    };

    let Some(first) = name.chars().next() else {
        return Err(anyhow!("Function name cannot be empty"));
    };

    if !first.is_ascii_alphabetic() && first != '_' && first != '$' {
        return Err(anyhow!(
            "Invalid function name: '{}'. Function names must start with a letter or underscore",
            function_name
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(anyhow!(
            "Invalid function name: '{}'. Function names can only contain letters, numbers, and underscores",
            function_name
        ));
    }

    if let Some(params) = params {
        if !params.ends_with(')') {
            return Err(anyhow!(
                "Invalid function signature: '{}'. Missing closing parenthesis",
                function_name
            ));
        }
    }

    Ok(())
}

/// Validates and parses a decimal or `0x` hex quantity (values, gas prices)
pub fn validate_hex_value(value_str: &str) -> Result<U256> {
    let value_str = value_str.trim();
    if value_str.is_empty() {
        return Err(anyhow!("Value cannot be empty"));
    }

    match value_str
        .strip_prefix("0x")
        .or_else(|| value_str.strip_prefix("0X"))
    {
        Some(hex) => U256::from_str_radix(hex, 16)
            .map_err(|_| anyhow!("Invalid hexadecimal value: '{}'", value_str)),
        None => U256::from_str_radix(value_str, 10).map_err(|_| {
            anyhow!(
                "Invalid numeric value: '{}'. Use decimal format or '0x' prefixed hex",
                value_str
            )
        }),
    }
}

/// A human hint for common RPC failures, shown next to the raw error.
///
/// The raw error is never replaced: revert reasons live in it.
pub fn interpret_rpc_error(error: &str) -> Option<&'static str> {
    let hint = if error.contains("execution reverted") {
        "The contract reverted. Its requirements were not met or an assertion failed."
    } else if error.contains("insufficient funds") {
        "The account cannot cover value plus gas."
    } else if error.contains("gas required exceeds allowance") {
        "Gas limit too low. Try a higher --gas-limit."
    } else if error.contains("nonce too low") {
        "Another transaction was already mined with this nonce."
    } else if error.contains("replacement transaction underpriced") {
        "Gas price too low to replace the pending transaction."
    } else if error.contains("connection refused") || error.contains("network unreachable") {
        "Cannot connect to the RPC endpoint. Check the RPC URL."
    } else if error.contains("timeout") {
        "The RPC endpoint timed out."
    } else if error.contains("rate limit") {
        "The RPC endpoint is rate limiting requests."
    } else if error.contains("method not found") {
        "The RPC endpoint does not support this method."
    } else {
        return None;
    };
    Some(hint)
}

/// Creates user-friendly error messages for ABI resolution errors
pub fn interpret_abi_error(error: &str, contract_address: &str) -> String {
    if error.contains("not verified") || error.contains("404") {
        format!(
            "The contract at {} is not verified on the explorer. Pass its ABI with --abi instead.",
            contract_address
        )
    } else if error.contains("rate limit") || error.contains("429") {
        "Explorer API rate limit reached. Try again shortly or set ETHERSCAN_API_KEY.".to_string()
    } else if error.contains("invalid API key") || error.contains("403") {
        "Explorer API rejected the key. Check ETHERSCAN_API_KEY.".to_string()
    } else {
        format!("ABI resolution error: {}", error)
    }
}

/// Lists the callable functions of an ABI by mutability.
pub fn describe_functions(abi: &JsonAbi) -> String {
    format!(
        "read functions: [{}], write functions: [{}]",
        function_names(abi, MutabilityClass::Read).join(", "),
        function_names(abi, MutabilityClass::Write).join(", ")
    )
}

/// Names what the ABI does offer when a member lookup failed.
pub fn missing_member_hint(error: &ContractError, abi: &JsonAbi) -> Option<String> {
    match error {
        ContractError::ContractMethodDoesNotExist { .. } => {
            Some(format!("The ABI has {}", describe_functions(abi)))
        }
        ContractError::ContractEventDoesNotExist { .. } => Some(format!(
            "The ABI has events: [{}]",
            event_names(abi).join(", ")
        )),
        _ => None,
    }
}
