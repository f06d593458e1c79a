//! Recovery-layer behavior: cycles, stagnation, and the failed-item ledger

use crate::{detail_json, detail_url, manifest_json, work_entry, Stage, MANIFEST_URL};
use shiori::CrawlSession;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_recovery_cycle_clears_failed_item() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1")]))
        .await;
    stage
        .mount_page(&detail_url("i1"), detail_json(&["http://cdn.test/u/a.png"]))
        .await;

    // Two item attempts plus the batch pass burn through the outage; the
    // first recovery cycle gets the good response
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(3)
        .expect(3)
        .mount(&stage.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unit".to_vec()))
        .expect(1)
        .mount(&stage.server)
        .await;

    let session = stage.session(vec![work_entry()]);
    let report = session.run().await.unwrap();

    assert_eq!(report.cycles_run, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.total_crawled(), 1);
    assert_eq!(report.total_failed(), 0);
    assert!(report.converged());
    assert!(report.persistent_failures.is_empty());
    assert!(session.log().failed_refs().unwrap().is_empty());
    assert!(stage.dirs.path().join("output/alpha/1/000.png").exists());
}

#[tokio::test]
async fn test_stagnant_recovery_stops_before_cycle_cap() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1")]))
        .await;
    stage
        .mount_page(&detail_url("i1"), detail_json(&["http://cdn.test/u/a.png"]))
        .await;
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&stage.server)
        .await;

    let mut config = stage.config(vec![work_entry()]);
    config.crawl.max_recovery_cycles = 5;
    let session = CrawlSession::new(config).unwrap();

    let report = session.run().await.unwrap();

    // The first cycle crawls nothing, so the remaining four never run
    assert_eq!(report.cycles_run, 1);
    assert_eq!(report.total_failed(), 1);
    assert!(!report.converged());
    assert_eq!(report.persistent_failures.len(), 1);
    assert_eq!(report.persistent_failures[0].work, "Alpha");
    assert_eq!(report.persistent_failures[0].number, "1");
    assert_eq!(
        session.log().failed_refs().unwrap(),
        vec!["Alpha::1".to_string()]
    );
}

#[tokio::test]
async fn test_retry_failed_clears_ledger() {
    let stage = Stage::start().await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1")]))
        .await;
    stage
        .mount_page(&detail_url("i1"), detail_json(&["http://cdn.test/u/a.png"]))
        .await;
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(2)
        .expect(2)
        .mount(&stage.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/u/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unit".to_vec()))
        .expect(1)
        .mount(&stage.server)
        .await;

    // Single attempts and no recovery cycles, so the session gives up fast
    // and leaves the item in the ledger
    let mut config = stage.config(vec![work_entry()]);
    config.crawl.item_attempts = 1;
    config.crawl.max_recovery_cycles = 0;
    let session = CrawlSession::new(config).unwrap();

    let report = session.run().await.unwrap();
    assert_eq!(report.total_failed(), 1);
    assert!(!report.converged());
    assert_eq!(
        session.log().failed_refs().unwrap(),
        vec!["Alpha::1".to_string()]
    );

    let retry = session.run_retry_failed().await.unwrap();

    assert_eq!(retry.recovered, 1);
    assert_eq!(retry.works[0].crawled, 1);
    assert!(retry.converged());
    assert!(session.log().failed_refs().unwrap().is_empty());

    let stats = session.log().stats("Alpha").unwrap();
    assert_eq!(stats.success_count, 1);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn test_unenumerated_work_recovers_in_cycle() {
    let stage = Stage::start().await;

    // Listing the work fails once, as a challenge interstitial status; the
    // recovery cycle re-enumerates and crawls it
    Mock::given(method("GET"))
        .and(path("/scrape"))
        .and(query_param("url", MANIFEST_URL))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&stage.server)
        .await;
    stage
        .mount_page(MANIFEST_URL, manifest_json(&[("i1", "1")]))
        .await;
    stage
        .mount_page(&detail_url("i1"), detail_json(&["http://cdn.test/u/a.png"]))
        .await;
    stage.mount_blob("/u/a.png", b"unit").await;

    let session = stage.session(vec![work_entry()]);
    let report = session.run().await.unwrap();

    assert_eq!(report.cycles_run, 1);
    assert_eq!(report.total_crawled(), 1);
    assert!(report.converged());
    assert_eq!(report.works[0].work, "Alpha");
    assert!(report.works[0].error.is_none());
}
