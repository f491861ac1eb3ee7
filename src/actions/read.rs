use std::sync::Arc;

use alloy::{dyn_abi::DynSolValue, json_abi::Function};
use serde_json::Value;
use tracing::warn;

use super::{normalize::normalize_output, warn_on_mismatch, ContractCallConfig};
use crate::{
    abi::{
        typed::{self, FunctionArgs, FunctionOutput, ReadFunction},
        value, ArgumentShape, MutabilityClass,
    },
    client::Client,
    contract::{AddressOrName, CallOverrides, Contract, Runner},
    error::{ContractError, Result},
};

/// Exact positional decode of a read, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadOutput {
    pub function: Function,
    pub values: Vec<DynSolValue>,
}

impl ReadOutput {
    pub fn normalize(&self) -> ArgumentShape {
        normalize_output(&self.function, &self.values)
    }

    /// Positional JSON without struct names, as stored in the query cache.
    pub fn raw_json(&self) -> Value {
        Value::Array(self.values.iter().map(value::plain).collect())
    }
}

/// Calls a read function on the provider for the requested chain.
///
/// A function missing from the ABI is not an error here: a warning is logged
/// and `None` is returned, since runtime-loaded ABIs cannot be checked ahead
/// of time.
pub async fn read_contract(client: &Client, config: &ContractCallConfig) -> Result<Option<ReadOutput>> {
    let state = client.state();
    let chain_id = state.chain_id(config.chain_id);
    let provider = state.provider(Some(chain_id))?;

    let shape = match config.select(state.explorer_url(chain_id)) {
        Ok(shape) => shape,
        Err(ContractError::ContractMethodDoesNotExist { .. }) => {
            warn!(
                function = %config.function_name,
                address = %config.address,
                "function does not exist on contract, returning no result"
            );
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    warn_on_mismatch(&shape, MutabilityClass::Read, &config.address);

    let runner = Runner::Provider(provider);
    let address = config.address.resolve(&runner).await?;
    let contract = Contract::new(address, config.abi.clone(), runner);
    let values = contract
        .call(shape.function, &config.args, config.overrides.as_ref())
        .await?;

    Ok(Some(ReadOutput {
        function: shape.function.clone(),
        values,
    }))
}

/// Reads a function declared with [`contract_function!`](crate::contract_function).
pub async fn read_contract_typed<F: ReadFunction>(
    client: &Client,
    address: impl Into<AddressOrName>,
    args: &FunctionArgs<F>,
    chain_id: Option<u64>,
    overrides: Option<CallOverrides>,
) -> Result<FunctionOutput<F>> {
    let function = F::function()?;
    let config = ContractCallConfig {
        address: address.into(),
        abi: Arc::new(F::abi()?),
        function_name: function.signature(),
        args: typed::encode_args::<F>(args)?,
        chain_id,
        overrides,
    };
    let output = read_contract(client, &config)
        .await?
        .ok_or_else(|| ContractError::InvalidAbi(F::SIGNATURE.to_string()))?;
    typed::decode_output::<F>(output.normalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        contract_function,
        testing::{fixture_abi_arc, function, MockProvider, TOKEN},
    };
    use alloy::primitives::{Address, U256};
    use serde_json::json;

    fn client(provider: &Arc<MockProvider>) -> Client {
        Client::builder().provider(provider.clone()).build()
    }

    #[tokio::test]
    async fn single_value_and_one_element_sequence_are_interchangeable() {
        let provider = MockProvider::new(1);
        let abi = fixture_abi_arc();
        provider.respond(
            &function(&abi, "ownerOf"),
            &[DynSolValue::Address(Address::repeat_byte(0x22))],
        );
        let client = client(&provider);

        let bare = ContractCallConfig::new(TOKEN, abi.clone(), "ownerOf")
            .args(ArgumentShape::Single(json!("7")));
        let wrapped = ContractCallConfig::new(TOKEN, abi.clone(), "ownerOf")
            .args(ArgumentShape::Many(vec![json!("7")]));

        let a = read_contract(&client, &bare).await.unwrap().unwrap();
        let b = read_contract(&client, &wrapped).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.normalize(),
            ArgumentShape::Single(json!(Address::repeat_byte(0x22).to_checksum(None)))
        );
    }

    #[tokio::test]
    async fn struct_arguments_are_accepted_as_records() {
        let provider = MockProvider::new(1);
        let abi = fixture_abi_arc();
        let set_position = function(&abi, "setPosition");
        provider.respond(&set_position, &[]);
        let client = client(&provider);

        let record = ContractCallConfig::new(TOKEN, abi.clone(), "setPosition")
            .args(ArgumentShape::Single(json!({ "x": "1", "y": "2" })));
        let sequence = ContractCallConfig::new(TOKEN, abi, "setPosition")
            .args(ArgumentShape::Many(vec![json!({ "x": "1", "y": "2" })]));

        // write functions are still callable through the read path
        assert!(read_contract(&client, &record).await.unwrap().is_some());
        assert!(read_contract(&client, &sequence).await.unwrap().is_some());
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn zero_input_functions_need_no_arguments() {
        let provider = MockProvider::new(1);
        let abi = fixture_abi_arc();
        provider.respond(
            &function(&abi, "name"),
            &[DynSolValue::String("Wagmi".to_string())],
        );
        let client = client(&provider);

        let output = read_contract(&client, &ContractCallConfig::new(TOKEN, abi, "name"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(output.normalize(), ArgumentShape::Single(json!("Wagmi")));
    }

    #[tokio::test]
    async fn output_arity_shapes_the_result() {
        let provider = MockProvider::new(1);
        let abi = fixture_abi_arc();
        provider.respond(
            &function(&abi, "getPair"),
            &[
                DynSolValue::Uint(U256::from(5), 256),
                DynSolValue::String("five".to_string()),
            ],
        );
        provider.respond(
            &function(&abi, "getPosition"),
            &[DynSolValue::Tuple(vec![
                DynSolValue::Uint(U256::from(1), 256),
                DynSolValue::Uint(U256::from(2), 256),
            ])],
        );
        provider.respond(&function(&abi, "ping"), &[]);
        let client = client(&provider);

        let pair = read_contract(&client, &ContractCallConfig::new(TOKEN, abi.clone(), "getPair"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            pair.normalize(),
            ArgumentShape::Many(vec![json!("5"), json!("five")])
        );

        let position =
            read_contract(&client, &ContractCallConfig::new(TOKEN, abi.clone(), "getPosition"))
                .await
                .unwrap()
                .unwrap();
        assert_eq!(
            position.normalize(),
            ArgumentShape::Single(json!({ "x": "1", "y": "2" }))
        );
        assert_eq!(position.raw_json(), json!([["1", "2"]]));

        let ping = read_contract(&client, &ContractCallConfig::new(TOKEN, abi, "ping"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ping.normalize(), ArgumentShape::Empty);
    }

    #[tokio::test]
    async fn missing_functions_resolve_to_none() {
        let provider = MockProvider::new(1);
        let client = client(&provider);
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "wagmi");

        assert_eq!(read_contract(&client, &config).await.unwrap(), None);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn reads_honor_chain_and_block() {
        let mainnet = MockProvider::new(1);
        let other = MockProvider::new(5);
        let abi = fixture_abi_arc();
        other.respond(&function(&abi, "name"), &[DynSolValue::String("Five".to_string())]);
        let client = Client::builder()
            .provider(mainnet.clone())
            .provider(other.clone())
            .build();

        let config = ContractCallConfig::new(TOKEN, abi.clone(), "name")
            .chain_id(5)
            .overrides(CallOverrides {
                block_number: Some(42),
                ..Default::default()
            });
        read_contract(&client, &config).await.unwrap().unwrap();
        assert_eq!(mainnet.call_count(), 0);
        assert_eq!(other.call_blocks(), vec![Some(42)]);

        let unknown = ContractCallConfig::new(TOKEN, abi, "name").chain_id(10);
        assert!(matches!(
            read_contract(&client, &unknown).await,
            Err(ContractError::ChainNotConfigured(10))
        ));
    }

    #[tokio::test]
    async fn provider_errors_pass_through() {
        let provider = MockProvider::new(1);
        let client = client(&provider);
        let config = ContractCallConfig::new(TOKEN, fixture_abi_arc(), "name");
        let err = read_contract(&client, &config).await.unwrap_err();
        assert_eq!(err.to_string(), "execution reverted");
    }

    #[tokio::test]
    async fn ens_targets_resolve_before_the_call() {
        let provider = MockProvider::new(1);
        let abi = fixture_abi_arc();
        provider.register_name("wagmi.eth", TOKEN);
        provider.respond(&function(&abi, "name"), &[DynSolValue::String("Wagmi".to_string())]);
        let client = client(&provider);

        let config = ContractCallConfig::new(
            AddressOrName::Name("wagmi.eth".to_string()),
            abi,
            "name",
        );
        assert!(read_contract(&client, &config).await.unwrap().is_some());
    }

    contract_function!(
        BalanceOf: read "function balanceOf(address owner) view returns (uint256)",
        (Address,) => (U256,)
    );
    contract_function!(
        GetPair: read "function getPair() view returns (uint256 amount, string label)",
        () => (U256, String)
    );

    #[tokio::test]
    async fn typed_reads_project_to_rust_types() {
        let provider = MockProvider::new(1);
        let abi = fixture_abi_arc();
        provider.respond(&function(&abi, "balanceOf"), &[DynSolValue::Uint(U256::from(9), 256)]);
        provider.respond(
            &function(&abi, "getPair"),
            &[
                DynSolValue::Uint(U256::from(5), 256),
                DynSolValue::String("five".to_string()),
            ],
        );
        let client = client(&provider);

        let balance = read_contract_typed::<BalanceOf>(&client, TOKEN, &Address::ZERO, None, None)
            .await
            .unwrap();
        assert_eq!(balance, U256::from(9));

        let (amount, label) = read_contract_typed::<GetPair>(&client, TOKEN, &(), None, None)
            .await
            .unwrap();
        assert_eq!(amount, U256::from(5));
        assert_eq!(label, "five");
    }
}
