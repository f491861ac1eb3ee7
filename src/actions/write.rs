use std::time::Duration;

use alloy::primitives::TxHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{prepare::prepare_write_contract, ContractCallConfig, PreparedWriteRequest};
use crate::{
    client::Client,
    error::{ContractError, Result},
    ethereum::TransactionInfo,
};

#[derive(Debug, Clone)]
pub enum WriteMode {
    /// Submit a request from [`prepare_write_contract`].
    Prepared { request: Option<PreparedWriteRequest> },
    /// Prepare and submit in one go.
    RecklesslyUnprepared(ContractCallConfig),
}

#[derive(Debug, Clone)]
pub struct WriteContractConfig {
    /// Chain the caller expects the signer to be on.
    pub chain_id: Option<u64>,
    pub mode: WriteMode,
}

impl WriteContractConfig {
    pub fn prepared(request: PreparedWriteRequest) -> Self {
        Self {
            chain_id: Some(request.chain_id()),
            mode: WriteMode::Prepared {
                request: Some(request),
            },
        }
    }

    pub fn recklessly_unprepared(config: ContractCallConfig) -> Self {
        Self {
            chain_id: config.chain_id,
            mode: WriteMode::RecklesslyUnprepared(config),
        }
    }
}

/// Returned as soon as the node accepts the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionResult {
    pub hash: TxHash,
    pub chain_id: u64,
}

/// Submits a write through the active signer.
///
/// The signer, chain and request checks all run against one state snapshot
/// before the first await, so a disconnect or chain switch cannot slip in
/// between validation and submission.
pub async fn write_contract(client: &Client, config: WriteContractConfig) -> Result<SendTransactionResult> {
    let state = client.state();
    let signer = state.signer().ok_or(ContractError::ConnectorNotFound)?;
    let active_chain = state.active_chain_id();

    if let Some(target) = config.chain_id {
        if target != active_chain {
            return Err(ContractError::ChainMismatch {
                active_chain: state.chain_label(active_chain),
                target_chain: state.chain_label(target),
            });
        }
    }

    let request = match config.mode {
        WriteMode::Prepared { request } => {
            let request = request.ok_or(ContractError::MissingRequest)?;
            if request.chain_id() != active_chain {
                return Err(ContractError::ChainMismatch {
                    active_chain: state.chain_label(active_chain),
                    target_chain: state.chain_label(request.chain_id()),
                });
            }
            request
        }
        WriteMode::RecklesslyUnprepared(call) => {
            debug!(function = %call.function_name, "preparing write before submission");
            prepare_write_contract(client, &call, Some(signer.clone()))
                .await?
                .request
        }
    };

    let function = request.function().to_string();
    let to = request.to();
    let mut tx = request.into_transaction();
    tx.from = Some(signer.address());
    tx.chain_id = Some(active_chain);

    let hash = signer.send_transaction(tx).await?;
    info!(%hash, %to, function = %function, chain_id = active_chain, "transaction submitted");

    Ok(SendTransactionResult {
        hash,
        chain_id: active_chain,
    })
}

/// Polls for the receipt of `result` until it has `confirmations` blocks.
///
/// There is no timeout; wrap the future in one if needed.
pub async fn wait_for_transaction(
    client: &Client,
    result: &SendTransactionResult,
    confirmations: u64,
    poll_interval: Duration,
) -> Result<TransactionInfo> {
    let mut interval = tokio::time::interval(poll_interval);
    loop {
        interval.tick().await;
        // re-resolved every round, the provider may have been replaced
        let provider = client.state().provider(Some(result.chain_id))?;
        let Some(info) = provider.transaction_receipt(result.hash).await? else {
            continue;
        };
        let Some(mined_at) = info.block_number else {
            continue;
        };
        let head = provider.block_number().await?;
        if head.saturating_sub(mined_at) + 1 >= confirmations.max(1) {
            debug!(hash = %result.hash, block = mined_at, status = info.status, "transaction confirmed");
            return Ok(info);
        }
    }
}
