//! Behavior tests for the result envelope: memoization, hook ordering,
//! and lazy row materialization, all through the public dispatch path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use settee::{Client, Connection};
use settee_core::{
    CallOptions, CallResult, HookSet, LogicalRequest, Outcome, RowSeed, WireResponse,
};
use settee_tests::ScriptedTransport;

fn one_shot_client(body: &Value) -> (Client, Arc<ScriptedTransport>) {
    let transport = ScriptedTransport::new(vec![Ok(WireResponse::json(200, body))]);
    let client = Client::builder()
        .transport(transport.clone())
        .connection(Connection::new("local", "http://local.test"))
        .build()
        .expect("client builds");
    (client, transport)
}

#[tokio::test]
async fn values_memoize_and_hooks_fire_exactly_once() {
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);

    let (client, _) = one_shot_client(&json!({"uptime": 1_700_000_000_i64}));
    let result = client
        .info(&CallOptions::new().on_values(move |value| {
            counter.fetch_add(1, Ordering::SeqCst);
            value
        }))
        .await
        .expect("dispatch runs");

    let first = result.values().expect("ready");
    let second = result.values().expect("ready");
    assert_eq!(first, second);
    // `info` itself reads values once for its cache slot.
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn chain_hooks_run_reverse_registered_and_thread_their_results() {
    let trace: Arc<Mutex<Vec<(String, u16)>>> = Arc::new(Mutex::new(Vec::new()));

    // H1 registered first, H2 second. H2 must run first, on the freshly
    // finalized result; H1 receives whatever H2 returned; the overall
    // result is H1's return value.
    let t1 = Arc::clone(&trace);
    let t2 = Arc::clone(&trace);
    let options = CallOptions::new()
        .on_chain(move |result| {
            t1.lock().expect("trace").push((String::from("h1"), result.status()));
            let replacement = CallResult::new(HookSet::default()).finalize(Outcome {
                connection: result.connection().map(ToOwned::to_owned),
                status: 201,
                message: String::from("replaced by h1"),
                response: None,
            });
            replacement
        })
        .on_chain(move |result| {
            t2.lock().expect("trace").push((String::from("h2"), result.status()));
            let replacement = CallResult::new(HookSet::default()).finalize(Outcome {
                connection: result.connection().map(ToOwned::to_owned),
                status: 299,
                message: String::from("replaced by h2"),
                response: None,
            });
            replacement
        });

    let (client, _) = one_shot_client(&json!({"ok": true}));
    let result = client.info(&options).await.expect("dispatch runs");

    assert_eq!(
        *trace.lock().expect("trace"),
        vec![(String::from("h2"), 200), (String::from("h1"), 299)],
        "h2 sees the finalized result, h1 sees h2's return value"
    );
    assert_eq!(result.status(), 201, "finalize returns h1's result");
    assert_eq!(result.message(), "replaced by h1");
}

#[tokio::test]
async fn rows_materialize_lazily_and_exactly_once() {
    let materialized = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&materialized);

    let options = CallOptions::new().on_row(move |result: &CallResult, number, _column| {
        let answer = result.raw_answer().ok()?;
        let raw = answer.get("rows")?.get(number - 1)?.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        Some(RowSeed::new(raw.clone(), raw))
    });

    let (client, _) = one_shot_client(&json!({
        "rows": [
            {"id": "a"}, {"id": "b"}, {"id": "c"}, {"id": "d"}
        ]
    }));
    let result = client
        .dispatcher()
        .dispatch(LogicalRequest::get("/db/_all_docs").with_options(&options))
        .await
        .expect("dispatch runs");

    let third = result.row(3).expect("ready").expect("row 3 exists");
    assert_eq!(third.number, 3);
    assert_eq!(materialized.load(Ordering::SeqCst), 1);

    let all = result.rows().expect("ready");
    assert_eq!(all.len(), 4);
    assert_eq!(
        materialized.load(Ordering::SeqCst),
        4,
        "row 3 must not be materialized again"
    );

    let again = result.rows().expect("ready");
    assert_eq!(again.len(), 4);
    assert_eq!(
        materialized.load(Ordering::SeqCst),
        4,
        "completeness is cached; no further probing"
    );

    assert!(result.row(5).expect("ready").is_none());
}

#[tokio::test]
async fn payload_accessors_refuse_unready_results() {
    let transport = ScriptedTransport::new(vec![Ok(WireResponse::json(200, &json!({})))]);
    let client = Client::builder()
        .transport(transport)
        .connection(Connection::new("local", "http://local.test"))
        .build()
        .expect("client builds");

    let delayed = client
        .info(&CallOptions::new().deferred())
        .await
        .expect("deferred dispatch");

    assert!(delayed.raw_answer().is_err());
    assert!(delayed.values().is_err());
    assert!(delayed.row(1).is_err());
    assert!(!delayed.is_ok(), "a delayed result is not truthy");
}

#[tokio::test]
async fn failed_results_are_falsy_with_a_readable_message() {
    let transport = ScriptedTransport::new(vec![Ok(WireResponse::json(
        409,
        &json!({"error": "conflict", "reason": "document update conflict"}),
    ))]);
    let client = Client::builder()
        .transport(transport)
        .connection(Connection::new("local", "http://local.test"))
        .build()
        .expect("client builds");

    let result = client.info(&CallOptions::new()).await.expect("dispatch runs");

    assert!(!result.is_ok());
    assert_eq!(result.status(), 409);
    assert_eq!(result.message(), "HTTP 409: conflict: document update conflict");
    // The decoded error body is still inspectable.
    assert_eq!(
        result.raw_answer().expect("ready").get("error"),
        Some(&json!("conflict"))
    );
}
