use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use serde_json::{json, Value};
use spectral::prelude::*;
use std::{net::SocketAddr, sync::Arc};
use url::Url;
use warp::{http::StatusCode, Filter};
use xud::{
    config::LndSettings,
    lnd::LndClient,
    swap_client::{ClientStatus, ErrorKind, PaymentState, SwapClient},
    swaps::{DealProposal, Role, Secret, SwapDeal},
};

type Requests = Arc<Mutex<Vec<(&'static str, Value)>>>;

#[derive(Clone)]
struct Script {
    send: Value,
    payments: Value,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            send: json!({ "payment_error": "not scripted" }),
            payments: json!({ "payments": [] }),
        }
    }
}

struct FakeLnd {
    addr: SocketAddr,
    requests: Requests,
}

impl FakeLnd {
    fn spawn(script: Script) -> Self {
        let requests = Requests::default();

        let getinfo = warp::path!("v1" / "getinfo").and(warp::get()).map(|| {
            warp::reply::json(&json!({
                "identity_pubkey": "02abc",
                "alias": "fake",
                "synced_to_chain": true,
            }))
        });
        let channels = warp::path!("v1" / "channels").and(warp::get()).map(|| {
            warp::reply::json(&json!({
                "channels": [{
                    "active": true,
                    "remote_pubkey": "02def",
                    "channel_point": "txid:0",
                    "local_balance": "70000",
                    "remote_balance": "30000",
                }]
            }))
        });

        let recorded = Arc::clone(&requests);
        let send = script.send;
        let transactions = warp::path!("v1" / "channels" / "transactions")
            .and(warp::post())
            .and(warp::body::json())
            .map(move |request: Value| {
                recorded.lock().push(("send", request));
                warp::reply::json(&send)
            });

        let payments_body = script.payments;
        let payments = warp::path!("v1" / "payments")
            .and(warp::get())
            .map(move || warp::reply::json(&payments_body));

        let hodl = recording(&requests, "hodl", warp::path!("v2" / "invoices" / "hodl"));
        let settle = recording(&requests, "settle", warp::path!("v2" / "invoices" / "settle"));
        let cancel = recording(&requests, "cancel", warp::path!("v2" / "invoices" / "cancel"));

        let routes = getinfo
            .or(transactions)
            .or(channels)
            .or(payments)
            .or(hodl)
            .or(settle)
            .or(cancel);

        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        Self { addr, requests }
    }

    fn requests(&self) -> Vec<(&'static str, Value)> {
        self.requests.lock().clone()
    }
}

fn recording(
    requests: &Requests,
    name: &'static str,
    path: impl Filter<Extract = (), Error = warp::Rejection> + Clone,
) -> impl Filter<Extract = (warp::reply::WithStatus<warp::reply::Json>,), Error = warp::Rejection> + Clone
{
    let recorded = Arc::clone(requests);
    path.and(warp::post())
        .and(warp::body::json())
        .map(move |request: Value| {
            recorded.lock().push((name, request));
            warp::reply::with_status(warp::reply::json(&json!({})), StatusCode::OK)
        })
}

fn client(addr: SocketAddr) -> LndClient {
    LndClient::new(&LndSettings {
        url: Url::parse(&format!("http://{}", addr)).unwrap(),
        no_macaroons: true,
        request_timeout_secs: 5,
        ..LndSettings::default()
    })
    .unwrap()
}

/// A deal in which this node pays or receives BTC depending on `role`.
fn active_deal(role: Role, preimage: &Secret) -> SwapDeal {
    let mut deal = SwapDeal::new(DealProposal {
        r_hash: preimage.hash(),
        order_id: "order-1".to_owned(),
        pair_id: "BTC/ETH".to_owned(),
        role,
        maker_currency: "BTC".to_owned(),
        taker_currency: "ETH".to_owned(),
        maker_units: 1000,
        taker_units: 5000,
        destination: Some("02def".to_owned()),
        maker_cltv_delta: 144,
    });
    deal.transition_to_active().unwrap();
    deal
}

fn sent(preimage: &Secret) -> Value {
    json!({
        "payment_error": "",
        "payment_preimage": BASE64.encode(preimage.as_bytes()),
    })
}

#[tokio::test]
async fn payment_returns_the_verified_preimage() {
    let preimage = Secret::random();
    let node = FakeLnd::spawn(Script {
        send: sent(&preimage),
        ..Script::default()
    });
    let deal = active_deal(Role::Taker, &preimage);

    let returned = client(node.addr).send_payment(&deal).await.unwrap();

    assert_eq!(returned, preimage);
    assert_eq!(node.requests(), vec![(
        "send",
        json!({
            "dest_string": "02def",
            "amt": "1000",
            "payment_hash_string": preimage.hash().to_string(),
            "final_cltv_delta": 144,
        })
    )]);
}

#[tokio::test]
async fn payment_errors_in_the_body_are_classified() {
    let cases = vec![
        ("insufficient local balance", ErrorKind::InsufficientBalance),
        ("unable to find a path to destination", ErrorKind::PaymentFailed),
    ];

    for (message, expected) in cases {
        let preimage = Secret::random();
        let node = FakeLnd::spawn(Script {
            send: json!({ "payment_error": message }),
            ..Script::default()
        });

        let error = client(node.addr)
            .send_payment(&active_deal(Role::Taker, &preimage))
            .await
            .unwrap_err();

        assert_eq!(error.kind, expected, "{}", message);
        assert_eq!(error.message, message);
    }
}

#[tokio::test]
async fn preimage_of_another_hash_is_an_invalid_response() {
    let preimage = Secret::random();
    let node = FakeLnd::spawn(Script {
        send: sent(&Secret::random()),
        ..Script::default()
    });

    let error = client(node.addr)
        .send_payment(&active_deal(Role::Taker, &preimage))
        .await
        .unwrap_err();

    assert_eq!(error.kind, ErrorKind::InvalidPaymentResponse);
}

#[tokio::test]
async fn lookup_reports_in_flight_succeeded_and_unknown_payments() {
    let in_flight = Secret::random();
    let succeeded = Secret::random();
    let node = FakeLnd::spawn(Script {
        payments: json!({
            "payments": [
                { "payment_hash": in_flight.hash().to_string(), "status": "IN_FLIGHT" },
                {
                    "payment_hash": succeeded.hash().to_string(),
                    "payment_preimage": succeeded.to_string(),
                    "status": "SUCCEEDED",
                },
            ]
        }),
        ..Script::default()
    });
    let client = client(node.addr);

    let pending = client.lookup_payment(in_flight.hash(), "BTC").await.unwrap();
    let settled = client.lookup_payment(succeeded.hash(), "BTC").await.unwrap();
    let unknown = client
        .lookup_payment(Secret::random().hash(), "BTC")
        .await
        .unwrap_err();

    assert_eq!(pending.state, PaymentState::Pending);
    assert_that(&pending.preimage).is_none();
    assert_eq!(settled.state, PaymentState::Succeeded);
    assert_eq!(settled.preimage, Some(succeeded));
    assert_eq!(unknown.kind, ErrorKind::PaymentNotFound);
}

#[tokio::test]
async fn hold_invoice_is_added_settled_and_cancelled() {
    let preimage = Secret::random();
    let r_hash = preimage.hash();
    let node = FakeLnd::spawn(Script::default());
    let client = client(node.addr);

    client.add_invoice(r_hash, 1000, 144, "BTC").await.unwrap();
    client.settle_invoice(r_hash, preimage, "BTC").await.unwrap();
    client.remove_invoice(r_hash).await.unwrap();

    let encoded_hash = BASE64.encode(r_hash.as_bytes());
    assert_eq!(node.requests(), vec![
        (
            "hodl",
            json!({ "hash": encoded_hash, "value": "1000", "cltv_expiry": "144" })
        ),
        (
            "settle",
            json!({ "preimage": BASE64.encode(preimage.as_bytes()) })
        ),
        ("cancel", json!({ "payment_hash": encoded_hash })),
    ]);
}

#[tokio::test]
async fn maker_with_preimage_settles_its_invoice() {
    let preimage = Secret::random();
    let node = FakeLnd::spawn(Script::default());
    let mut deal = active_deal(Role::Maker, &preimage);
    deal.set_preimage(preimage).unwrap();

    let returned = client(node.addr).send_payment(&deal).await.unwrap();

    assert_eq!(returned, preimage);
    assert_eq!(node.requests(), vec![(
        "settle",
        json!({ "preimage": BASE64.encode(preimage.as_bytes()) })
    )]);
}

#[tokio::test]
async fn verified_connection_caches_channel_capacity() {
    let node = FakeLnd::spawn(Script::default());
    let client = client(node.addr);
    client.init_specific().await.unwrap();

    client.verify_connection().await.unwrap();

    assert_eq!(client.status(), ClientStatus::ConnectionVerified);
    assert_eq!(client.total_outbound_amount("BTC"), 70_000);
    assert_eq!(client.max_channel_inbound_amount("BTC"), 30_000);
}
