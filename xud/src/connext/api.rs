//! Request and response bodies of the Connext node's REST API. Amounts
//! travel as decimal strings of base units, hashes and preimages as
//! `0x`-prefixed hex.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct ConnectRequest<'a> {
    pub mnemonic: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub signer_address: String,
    #[serde(default)]
    pub public_identifier: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub free_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnchainBalance {
    pub balance: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashLockTransfer<'a> {
    pub amount: String,
    pub asset_id: &'a str,
    pub lock_hash: String,
    pub timelock: String,
    pub recipient: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashLockResolve<'a> {
    pub pre_image: String,
    pub asset_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreimageResponse {
    pub pre_image: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashLockStatus {
    pub status: TransferStatus,
    #[serde(default)]
    pub pre_image: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit<'a> {
    pub amount: String,
    pub asset_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdraw<'a> {
    pub amount: String,
    pub asset_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<&'a str>,
}
