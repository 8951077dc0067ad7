//! Behavior tests for pagination: round-size bookkeeping, bookmark
//! exclusivity with skip, option conflicts, and continuation.

use serde_json::json;
use settee::{Client, Connection};
use settee_core::{
    CallError, CallOptions, LogicalRequest, PageFns, PageSpec, Paginator, UsageError,
};
use settee_tests::PagedServer;

fn client_for(server: std::sync::Arc<PagedServer>) -> Client {
    Client::builder()
        .transport(server)
        .connection(Connection::new("local", "http://local.test"))
        .build()
        .expect("client builds")
}

#[tokio::test]
async fn three_pages_over_seventy_items_come_back_25_25_20() {
    let server = PagedServer::new(70, 25);
    let client = client_for(server);
    let db = client.db("things");

    let first = db
        .all_docs(PageSpec::new().page_size(25).request_max(25), &CallOptions::new())
        .await
        .expect("first page");
    assert_eq!(first.page().len(), 25);
    assert!(!first.is_last_page());
    assert!(!first.page_is_partial());

    let second = client.next_page(&first).await.expect("second page");
    assert_eq!(second.page().len(), 25);
    assert!(!second.is_last_page());
    assert!(!second.page_is_partial());

    let third = client.next_page(&second).await.expect("third page");
    assert_eq!(third.page().len(), 20);
    assert!(third.is_last_page());
    assert!(!third.page_is_partial());

    // Pages carry distinct, consecutive items.
    let first_id = first.page()[0].get("id").cloned();
    let third_first_id = third.page()[0].get("id").cloned();
    assert_eq!(first_id, Some(json!("doc-0000")));
    assert_eq!(third_first_id, Some(json!("doc-0050")));

    // Past the end: a cheap no-op, not a re-query.
    let served = client.next_page(&third).await.expect("no-op page");
    assert!(served.page().is_empty());
    assert!(served.is_last_page());
}

#[tokio::test]
async fn bookmarks_always_travel_with_zero_skip() {
    let server = PagedServer::with_bookmarks(40, 10);
    let client = client_for(server.clone());
    let db = client.db("things");

    let first = db
        .all_docs(
            PageSpec::new().page_size(10).request_max(10).skip(5),
            &CallOptions::new(),
        )
        .await
        .expect("first page");
    assert_eq!(first.page().len(), 10);

    let second = client.next_page(&first).await.expect("second page");
    assert_eq!(second.page().len(), 10);

    let requests = server.requests();
    assert_eq!(requests.len(), 2);

    // First round: no bookmark known for offset 5, numeric skip applies.
    assert_eq!(requests[0].skip, Some(5));
    assert_eq!(requests[0].bookmark, None);

    // Second round: a bookmark was recorded at cumulative offset 15; it
    // must be used, with the numeric skip forced to zero even though
    // the caller's original skip was nonzero.
    assert_eq!(requests[1].bookmark.as_deref(), Some("b15"));
    assert_eq!(requests[1].skip, Some(0));
}

#[tokio::test]
async fn skip_and_page_number_cannot_be_combined() {
    let server = PagedServer::new(10, 10);
    let client = client_for(server);

    let err = client
        .db("things")
        .all_docs(
            PageSpec::new().page_size(10).skip(3).page_number(2),
            &CallOptions::new(),
        )
        .await
        .expect_err("conflicting options");

    assert!(matches!(
        err,
        CallError::Usage(UsageError::ConflictingPageOptions)
    ));
}

#[tokio::test]
async fn find_pages_through_bookmarks_to_thirty_four_documents() {
    let server = PagedServer::with_bookmarks(34, 10);
    let client = client_for(server.clone());
    let db = client.db("things");

    let mut page = db
        .find(
            json!({}),
            PageSpec::new().page_size(10).request_max(10),
            &CallOptions::new(),
        )
        .await
        .expect("first page");

    let mut total = page.page().len();
    while !page.is_last_page() {
        page = client.next_page(&page).await.expect("continuation");
        total += page.page().len();
    }

    assert_eq!(total, 34);
    assert!(page.is_last_page());

    // Rounds two through four ride the server's bookmarks.
    let requests = server.requests();
    let bookmarks: Vec<Option<String>> =
        requests.iter().map(|round| round.bookmark.clone()).collect();
    assert_eq!(bookmarks[0], None);
    assert_eq!(bookmarks[1].as_deref(), Some("b10"));
    assert_eq!(bookmarks[2].as_deref(), Some("b20"));
    assert_eq!(bookmarks[3].as_deref(), Some("b30"));
    // The find api takes its paging in the body; a bookmarked round
    // must carry an explicit zero skip, never the numeric offset.
    assert!(requests
        .iter()
        .filter(|round| round.bookmark.is_some())
        .all(|round| round.skip == Some(0)));
}

#[tokio::test]
async fn map_filtering_does_not_starve_the_stop_rule() {
    let server = PagedServer::new(20, 10);
    let client = client_for(server);

    // A map that drops everything: the page buffer stays empty, but the
    // raw harvest count still drives offsets and the stop decision, so
    // the sequence terminates at the genuine end of the data.
    let page = client
        .db("things")
        .all_docs(
            PageSpec::new().request_max(10).map(|_| None),
            &CallOptions::new(),
        )
        .await
        .expect("page");

    assert!(page.page().is_empty());
    assert!(page.is_last_page());
    let state = page.page_state().expect("paged");
    assert_eq!(state.harvested(), 20);
}

#[tokio::test]
async fn smaller_stop_rule_uses_the_first_round_as_baseline() {
    // 25 items in rounds of 10: 10, 10, 5 — the 5-item round is smaller
    // than the baseline of 10 and stops the sequence without an empty
    // round.
    let server = PagedServer::new(25, 10);
    let client = client_for(server.clone());

    let page = client
        .db("things")
        .all_docs(
            PageSpec::new()
                .request_max(10)
                .stop(settee_core::StopRule::Smaller),
            &CallOptions::new(),
        )
        .await
        .expect("page");

    assert_eq!(page.page().len(), 25);
    assert_eq!(server.requests().len(), 3);
    // The short round stopped the loop but the data may not be done:
    // this page is still partial in unbounded mode.
    assert!(!page.is_last_page());
    assert!(page.page_is_partial());
}

#[tokio::test]
async fn snapshot_resumes_across_clients() {
    let server = PagedServer::new(30, 10);
    let client = client_for(server.clone());

    let first = client
        .db("things")
        .all_docs(PageSpec::new().page_size(10).request_max(10), &CallOptions::new())
        .await
        .expect("first page");
    assert_eq!(first.page().len(), 10);

    let snapshot = first.page_state().expect("paged").snapshot();
    let encoded = serde_json::to_string(&snapshot).expect("snapshot serializes");

    // A different client process picks up where the first left off.
    let other = client_for(server);
    let decoded = serde_json::from_str(&encoded).expect("snapshot decodes");
    let template = LogicalRequest::get("/things/_all_docs");
    let second = Paginator::new(other.dispatcher())
        .resume(template, decoded, PageFns::default())
        .await
        .expect("resumed page");

    assert_eq!(second.page().len(), 10);
    assert_eq!(
        second.page()[0].get("id"),
        Some(&json!("doc-0010")),
        "continuation starts at the folded offset"
    );
}
