//! ENS forward resolution through the registry contract.

use alloy::{
    primitives::{address, keccak256, Address, B256},
    rpc::types::TransactionRequest,
    sol,
    sol_types::SolCall,
};
use anyhow::{anyhow, Result};

use super::ChainProvider;

/// ENS registry, same address on every chain that deploys it.
pub const ENS_REGISTRY: Address = address!("00000000000C2E074eC69A0dFb2997BA6C7d2e1e");

sol! {
    function resolver(bytes32 node) external view returns (address);
    function addr(bytes32 node) external view returns (address);
}

/// EIP-137 namehash. Labels are lowercased but not otherwise normalized.
pub fn namehash(name: &str) -> B256 {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return B256::ZERO;
    }
    name.rsplit('.').fold(B256::ZERO, |node, label| {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(keccak256(label.as_bytes()).as_slice());
        keccak256(buf)
    })
}

pub async fn resolve(provider: &dyn ChainProvider, name: &str) -> Result<Address> {
    let node = namehash(name);

    let request = TransactionRequest::default()
        .to(ENS_REGISTRY)
        .input(resolverCall { node }.abi_encode().into());
    let data = provider.call(&request, None).await?;
    let resolver = resolverCall::abi_decode_returns(&data, false)
        .map_err(|e| anyhow!("Invalid ENS registry response for {}: {}", name, e))?
        ._0;
    if resolver.is_zero() {
        return Err(anyhow!("ENS name {} has no resolver", name));
    }

    let request = TransactionRequest::default()
        .to(resolver)
        .input(addrCall { node }.abi_encode().into());
    let data = provider.call(&request, None).await?;
    let resolved = addrCall::abi_decode_returns(&data, false)
        .map_err(|e| anyhow!("Invalid ENS resolver response for {}: {}", name, e))?
        ._0;
    if resolved.is_zero() {
        return Err(anyhow!("ENS name {} does not resolve to an address", name));
    }

    tracing::debug!("Resolved {} to {}", name, resolved);
    Ok(resolved)
}
