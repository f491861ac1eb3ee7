use std::sync::Arc;

use alloy::{
    json_abi::Function,
    primitives::{Address, Bytes, U256},
    rpc::types::TransactionRequest,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{warn_on_mismatch, ContractCallConfig};
use crate::{
    abi::{
        typed::{self, FunctionArgs, WriteFunction},
        MutabilityClass,
    },
    client::Client,
    contract::{AddressOrName, CallOverrides, Contract, Runner},
    error::{ContractError, Result},
    ethereum::ChainSigner,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    Prepared,
    RecklesslyUnprepared,
}

/// A write assembled and gas-estimated ahead of submission.
///
/// Holds no signer: whichever signer is active at submission signs it.
/// Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedWriteRequest {
    chain_id: u64,
    function: String,
    to: Address,
    data: Bytes,
    gas_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas_price: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_fee_per_gas: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_priority_fee_per_gas: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nonce: Option<u64>,
}

impl PreparedWriteRequest {
    fn new(chain_id: u64, function: &Function, to: Address, tx: &TransactionRequest, gas_limit: u64) -> Self {
        Self {
            chain_id,
            function: function.signature(),
            to,
            data: tx.input.input().cloned().unwrap_or_default(),
            gas_limit,
            value: tx.value,
            gas_price: tx.gas_price,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
            nonce: tx.nonce,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Signature of the function being called.
    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    pub fn value(&self) -> Option<U256> {
        self.value
    }

    pub fn gas_price(&self) -> Option<u128> {
        self.gas_price
    }

    pub fn max_fee_per_gas(&self) -> Option<u128> {
        self.max_fee_per_gas
    }

    pub fn max_priority_fee_per_gas(&self) -> Option<u128> {
        self.max_priority_fee_per_gas
    }

    /// The unsigned transaction, without a sender.
    pub fn into_transaction(self) -> TransactionRequest {
        let mut tx = TransactionRequest::default()
            .to(self.to)
            .input(self.data.into());
        tx.gas = Some(self.gas_limit);
        tx.value = self.value;
        tx.gas_price = self.gas_price;
        tx.max_fee_per_gas = self.max_fee_per_gas;
        tx.max_priority_fee_per_gas = self.max_priority_fee_per_gas;
        tx.nonce = self.nonce;
        tx
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareWriteContractResult {
    pub mode: RequestMode,
    pub chain_id: u64,
    pub request: PreparedWriteRequest,
}

/// Builds and gas-estimates a write without sending it.
///
/// Uses `signer` when given, the active one otherwise. A gas limit in the
/// overrides is kept as-is; otherwise the signer estimates one, and an
/// estimation failure is returned unchanged so revert reasons survive.
pub async fn prepare_write_contract(
    client: &Client,
    config: &ContractCallConfig,
    signer: Option<Arc<dyn ChainSigner>>,
) -> Result<PrepareWriteContractResult> {
    let state = client.state();
    let signer = signer
        .or_else(|| state.signer())
        .ok_or(ContractError::ConnectorNotFound)?;
    let chain_id = signer.chain_id();

    let shape = config.select(state.explorer_url(chain_id))?;
    warn_on_mismatch(&shape, MutabilityClass::Write, &config.address);

    let runner = Runner::from_signer(signer.clone());
    let address = config.address.resolve(&runner).await?;
    let contract = Contract::new(address, config.abi.clone(), runner);
    let mut tx = contract.populate_transaction(shape.function, &config.args, config.overrides.as_ref())?;

    let gas_limit = match tx.gas {
        Some(gas) => gas,
        None => signer.estimate_gas(&tx).await?,
    };
    tx.gas = Some(gas_limit);
    debug!(
        function = %shape.function.signature(),
        %address,
        gas_limit,
        "prepared write"
    );

    Ok(PrepareWriteContractResult {
        mode: RequestMode::Prepared,
        chain_id,
        request: PreparedWriteRequest::new(chain_id, shape.function, address, &tx, gas_limit),
    })
}

/// Prepares a function declared with [`contract_function!`](crate::contract_function).
pub async fn prepare_write_contract_typed<F: WriteFunction>(
    client: &Client,
    address: impl Into<AddressOrName>,
    args: &FunctionArgs<F>,
    overrides: Option<CallOverrides>,
) -> Result<PrepareWriteContractResult> {
    let config = ContractCallConfig {
        address: address.into(),
        abi: Arc::new(F::abi()?),
        function_name: F::function()?.signature(),
        args: typed::encode_args::<F>(args)?,
        chain_id: None,
        overrides,
    };
    prepare_write_contract(client, &config, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        abi::ArgumentShape,
        contract_function,
        testing::{fixture_abi_arc, MockConnector, MockProvider, MockSigner, TOKEN},
    };
    use serde_json::json;

    async fn connected() -> (Client, Arc<MockConnector>) {
        let client = Client::builder().provider(MockProvider::new(1)).build();
        let connector = MockConnector::new(1);
        client.connect(connector.clone(), None).await.unwrap();
        (client, connector)
    }

    #[tokio::test]
    async fn requires_a_signer() {
        let client = Client::builder().provider(MockProvider::new(1)).build();
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "mint");
        assert!(matches!(
            prepare_write_contract(&client, &config, None).await,
            Err(ContractError::ConnectorNotFound)
        ));
    }

    #[tokio::test]
    async fn missing_functions_are_hard_errors() {
        let (client, _) = connected().await;
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "wagmi");
        let err = prepare_write_contract(&client, &config, None).await.unwrap_err();
        match err {
            ContractError::ContractMethodDoesNotExist {
                address,
                function_name,
                ..
            } => {
                assert_eq!(address, TOKEN.to_checksum(None));
                assert_eq!(function_name, "wagmi");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn estimates_gas_when_not_given() {
        let (client, connector) = connected().await;
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "mint");
        let prepared = prepare_write_contract(&client, &config, None).await.unwrap();

        assert_eq!(prepared.mode, RequestMode::Prepared);
        assert_eq!(prepared.chain_id, 1);
        assert_eq!(prepared.request.gas_limit(), 50_000);
        assert_eq!(prepared.request.to(), TOKEN);
        assert_eq!(prepared.request.function(), "mint()");
        assert_eq!(connector.signer().unwrap().estimate_count(), 1);
    }

    #[tokio::test]
    async fn keeps_an_explicit_gas_limit() {
        let (client, connector) = connected().await;
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "mint")
            .args(ArgumentShape::Single(json!(3)))
            .overrides(CallOverrides {
                gas_limit: Some(120_000),
                ..Default::default()
            });
        let prepared = prepare_write_contract(&client, &config, None).await.unwrap();
        assert_eq!(prepared.request.gas_limit(), 120_000);
        assert_eq!(prepared.request.function(), "mint(uint256)");
        assert_eq!(connector.signer().unwrap().estimate_count(), 0);
    }

    #[tokio::test]
    async fn estimation_failures_pass_through_unchanged() {
        let client = Client::builder().provider(MockProvider::new(1)).build();
        let signer = MockSigner::new(1);
        signer.fail_estimation("execution reverted: ERC721: token already minted");

        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "mint");
        let err = prepare_write_contract(&client, &config, Some(signer as Arc<dyn ChainSigner>))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "execution reverted: ERC721: token already minted"
        );
    }

    #[tokio::test]
    async fn prepared_requests_carry_no_sender() {
        let (client, _) = connected().await;
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "deposit").overrides(
            CallOverrides {
                value: Some(U256::from(10)),
                ..Default::default()
            },
        );
        let prepared = prepare_write_contract(&client, &config, None).await.unwrap();
        let tx = prepared.request.clone().into_transaction();
        assert_eq!(tx.from, None);
        assert_eq!(tx.value, Some(U256::from(10)));
        assert_eq!(tx.gas, Some(50_000));

        let encoded = serde_json::to_value(&prepared).unwrap();
        assert_eq!(encoded["mode"], json!("prepared"));
        let decoded: PrepareWriteContractResult = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, prepared);
    }

    contract_function!(MintTo: write "function mint(uint256 tokenId)", (U256,) => ());

    #[tokio::test]
    async fn typed_prepare_uses_the_declared_signature() {
        let (client, _) = connected().await;
        let prepared = prepare_write_contract_typed::<MintTo>(&client, TOKEN, &U256::from(4), None)
            .await
            .unwrap();
        assert_eq!(prepared.request.function(), "mint(uint256)");
        assert_eq!(prepared.request.data().len(), 4 + 32);
    }
}
