//! Bodies of the lnd REST gateway. 64-bit integers are encoded as strings
//! and byte fields as base64, following the gRPC JSON mapping.

use serde::{de, Deserialize, Deserializer, Serialize};

/// Accepts an integer either as a JSON number or as a decimal string.
fn int64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Text(text) => text.parse().map_err(de::Error::custom),
        Repr::Number(number) => Ok(number),
    }
}

#[derive(Debug, Deserialize)]
pub struct GetInfo {
    pub identity_pubkey: String,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub synced_to_chain: bool,
}

#[derive(Debug, Deserialize)]
pub struct ChannelBalanceResponse {
    #[serde(default, deserialize_with = "int64")]
    pub balance: u64,
    #[serde(default, deserialize_with = "int64")]
    pub pending_open_balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct WalletBalanceResponse {
    #[serde(default, deserialize_with = "int64")]
    pub total_balance: u64,
    #[serde(default, deserialize_with = "int64")]
    pub confirmed_balance: u64,
    #[serde(default, deserialize_with = "int64")]
    pub unconfirmed_balance: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListChannels {
    #[serde(default)]
    pub channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
pub struct Channel {
    #[serde(default)]
    pub active: bool,
    pub remote_pubkey: String,
    pub channel_point: String,
    #[serde(default, deserialize_with = "int64")]
    pub local_balance: u64,
    #[serde(default, deserialize_with = "int64")]
    pub remote_balance: u64,
}

#[derive(Debug, Serialize)]
pub struct SendRequest<'a> {
    pub dest_string: &'a str,
    pub amt: String,
    pub payment_hash_string: String,
    pub final_cltv_delta: u64,
}

#[derive(Debug, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub payment_error: String,
    #[serde(default)]
    pub payment_preimage: String,
}

#[derive(Debug, Deserialize)]
pub struct ListPayments {
    #[serde(default)]
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Unknown,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Debug, Deserialize)]
pub struct Payment {
    pub payment_hash: String,
    #[serde(default)]
    pub payment_preimage: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct AddHoldInvoice {
    pub hash: String,
    pub value: String,
    pub cltv_expiry: String,
}

#[derive(Debug, Serialize)]
pub struct SettleInvoice {
    pub preimage: String,
}

#[derive(Debug, Serialize)]
pub struct CancelInvoice {
    pub payment_hash: String,
}

#[derive(Debug, Serialize)]
pub struct ConnectPeer<'a> {
    pub addr: PeerAddress<'a>,
    pub perm: bool,
}

#[derive(Debug, Serialize)]
pub struct PeerAddress<'a> {
    pub pubkey: &'a str,
    pub host: &'a str,
}

#[derive(Debug, Serialize)]
pub struct OpenChannel<'a> {
    pub node_pubkey_string: &'a str,
    pub local_funding_amount: String,
}
