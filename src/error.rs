use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = ContractError> = std::result::Result<T, E>;

/// Errors surfaced by the contract actions.
///
/// Validation failures are built locally and carry the addresses, names and
/// chain ids involved. Failures coming from a provider or signer (gas
/// estimation, submission, transport) are kept as-is in [`ContractError::Provider`]
/// so revert reasons reach the caller untouched.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Connector not found")]
    ConnectorNotFound,

    #[error(
        "Function \"{function_name}\" on contract \"{address}\" does not exist.{}",
        explorer_hint(.address, .explorer_url.as_deref())
    )]
    ContractMethodDoesNotExist {
        address: String,
        function_name: String,
        explorer_url: Option<String>,
    },

    #[error(
        "Function \"{function_name}\" on contract \"{address}\" is overloaded ({}). Use the full signature instead.",
        .candidates.join(", ")
    )]
    AmbiguousFunction {
        address: String,
        function_name: String,
        candidates: Vec<String>,
    },

    #[error("Event \"{event_name}\" on contract \"{address}\" does not exist.")]
    ContractEventDoesNotExist { address: String, event_name: String },

    #[error("Chain mismatch: Expected \"{target_chain}\", received \"{active_chain}\".")]
    ChainMismatch {
        active_chain: String,
        target_chain: String,
    },

    #[error("Function \"{function_name}\" is {mutability} and cannot be used to {operation}")]
    MutabilityMismatch {
        function_name: String,
        mutability: &'static str,
        operation: &'static str,
    },

    #[error("`request` is required")]
    MissingRequest,

    #[error("No provider configured for chain {0}")]
    ChainNotConfigured(u64),

    #[error("Invalid arguments for \"{function_name}\": {reason}")]
    InvalidArguments {
        function_name: String,
        reason: String,
    },

    #[error("Unsupported ABI type \"{0}\"")]
    UnsupportedType(String),

    #[error("Invalid ABI: {0}")]
    InvalidAbi(String),

    #[error("Failed to decode \"{name}\": {source}")]
    Decode {
        name: String,
        #[source]
        source: alloy::dyn_abi::Error,
    },

    #[error(transparent)]
    Provider(#[from] anyhow::Error),

    /// A failure shared by every caller of one deduplicated cached fetch.
    #[error(transparent)]
    Shared(Arc<ContractError>),
}

impl ContractError {
    pub(crate) fn from_shared(error: Arc<ContractError>) -> Self {
        Arc::try_unwrap(error).unwrap_or_else(Self::Shared)
    }
}

fn explorer_hint(address: &str, explorer_url: Option<&str>) -> String {
    match explorer_url {
        Some(url) => format!(
            "\n\nBlock explorer: {}/address/{}#readContract",
            url.trim_end_matches('/'),
            address
        ),
        None => String::new(),
    }
}
