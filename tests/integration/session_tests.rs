//! End-to-end crawl sessions against the mock stage

use crate::{detail_json, detail_url, manifest_json, work_entry, Stage, MANIFEST_URL};
use shiori::Item;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_crawl_completes_single_work() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1"), ("i2", "2")]))
        .await;
    stage
        .mount_page(
            &detail_url("i1"),
            detail_json(&["http://cdn.test/u/a1-0.png", "http://cdn.test/u/a1-1.png"]),
        )
        .await;
    stage
        .mount_page(&detail_url("i2"), detail_json(&["http://cdn.test/u/a2-0.jpg"]))
        .await;
    stage.mount_blob("/u/a1-0.png", b"unit-1-0").await;
    stage.mount_blob("/u/a1-1.png", b"unit-1-1").await;
    stage.mount_blob("/u/a2-0.jpg", b"unit-2-0").await;

    let session = stage.session(vec![work_entry()]);
    let report = session.run().await.unwrap();

    assert_eq!(report.total_crawled(), 2);
    assert_eq!(report.total_failed(), 0);
    assert_eq!(report.cycles_run, 0);
    assert_eq!(report.recovered, 0);
    assert!(report.converged());

    assert_eq!(report.works.len(), 1);
    assert_eq!(report.works[0].work, "Alpha");
    assert_eq!(report.works[0].total_items, 2);
    assert_eq!(report.works[0].already_done, 0);

    // Units land under the slugged work and item names
    let output = stage.dirs.path().join("output");
    let first = std::fs::read(output.join("alpha/1/000.png")).unwrap();
    assert_eq!(first, b"unit-1-0");
    assert!(output.join("alpha/1/001.png").exists());
    assert!(output.join("alpha/2/000.jpg").exists());

    let stats = session.log().stats("Alpha").unwrap();
    assert_eq!(stats.success_count, 2);
    assert_eq!(stats.failure_count, 0);
    assert!(session.log().failed_refs().unwrap().is_empty());
}

#[tokio::test]
async fn test_second_session_skips_completed_items() {
    let stage = Stage::start().await;

    // The manifest is listed once per session; the item detail and its unit
    // must only ever be fetched by the first one
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", MANIFEST_URL))
        .respond_with(ResponseTemplate::new(200).set_body_string(manifest_json(&[("i1", "1")])))
        .expect(2)
        .mount(&stage.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", detail_url("i1")))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(detail_json(&["http://cdn.test/u/a.png"])),
        )
        .expect(1)
        .mount(&stage.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unit".to_vec()))
        .expect(1)
        .mount(&stage.server)
        .await;

    let first = stage.session(vec![work_entry()]);
    let report = first.run().await.unwrap();
    assert_eq!(report.total_crawled(), 1);

    let second = stage.session(vec![work_entry()]);
    let rerun = second.run().await.unwrap();

    assert_eq!(rerun.total_crawled(), 0);
    assert_eq!(rerun.total_already_done(), 1);
    assert_eq!(rerun.works[0].already_done, 1);
    assert!(rerun.converged());
}

#[tokio::test]
async fn test_challenge_rotates_and_recovers() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1")]))
        .await;

    // The first detail fetch renders to an interstitial; the retry after the
    // anti-bot wait gets the real document
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", detail_url("i1")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html>Checking your browser before accessing</html>"),
        )
        .up_to_n_times(1)
        .mount(&stage.server)
        .await;
    stage
        .mount_page(&detail_url("i1"), detail_json(&["http://cdn.test/u/a.png"]))
        .await;
    stage.mount_blob("/u/a.png", b"unit").await;

    let session = stage.session(vec![work_entry()]);
    let report = session.run().await.unwrap();

    assert_eq!(report.total_crawled(), 1);
    assert_eq!(report.cycles_run, 0);
    assert!(report.converged());
    assert!(stage.dirs.path().join("output/alpha/1/000.png").exists());
}

#[tokio::test]
async fn test_dead_edge_retried_within_pass() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1")]))
        .await;
    stage
        .mount_page(&detail_url("i1"), detail_json(&["http://cdn.test/u/a.png"]))
        .await;

    // One stale edge serving 404, then a good one
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .mount(&stage.server)
        .await;
    stage.mount_blob("/u/a.png", b"unit").await;

    let session = stage.session(vec![work_entry()]);
    let report = session.run().await.unwrap();

    assert_eq!(report.total_crawled(), 1);
    assert_eq!(report.total_failed(), 0);
    assert_eq!(report.cycles_run, 0);
    assert!(report.converged());
}

#[tokio::test]
async fn test_unenumerable_work_is_reported() {
    let stage = Stage::start().await;
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", MANIFEST_URL))
        .respond_with(ResponseTemplate::new(500))
        .mount(&stage.server)
        .await;

    let session = stage.session(vec![work_entry()]);
    let report = session.run().await.unwrap();

    // One recovery cycle runs, makes no progress, and stops the session
    assert_eq!(report.cycles_run, 1);
    assert_eq!(report.total_crawled(), 0);
    assert_eq!(report.aborted_works(), 1);
    assert!(!report.converged());
    assert!(report.works[0].error.is_some());
    assert_eq!(report.pool.total, 1);
    assert_eq!(report.pool.banned, 0);
}

#[tokio::test]
async fn test_plan_reports_outstanding_items() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1"), ("i2", "2")]))
        .await;

    let session = stage.session(vec![work_entry()]);
    session
        .log()
        .record_success("Alpha", "alpha", &Item::new("i1", "1"), 4, "output/alpha/1")
        .unwrap();

    let plans = session.plan().await.unwrap();

    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].name, "Alpha");
    assert_eq!(plans[0].total_items, 2);
    assert_eq!(plans[0].outstanding, vec!["2".to_string()]);
    assert!(plans[0].error.is_none());
}
