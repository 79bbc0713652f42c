use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bulkmint::gateway::{CallOptions, Gateway, GatewayConfig};
use bulkmint::ledger::RpcLedgerClient;
use bulkmint::planner::CapacityPlanner;
use bulkmint::state_machine::{JobOptions, JobStatus, Record};
use bulkmint::store::{FileJobStore, JobStore};
use bulkmint::{Orchestrator, OrchestratorConfig};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers every mint with a receipt naming its leaf.
struct Receipt {
    delay: Duration,
}

impl Respond for Receipt {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap();
        let leaf = body["params"][0]["leafIndex"].as_u64().unwrap();
        ResponseTemplate::new(200)
            .set_delay(self.delay)
            .set_body_json(json!({
                "jsonrpc": "2.0",
                "id": body["id"],
                "result": {"signature": format!("sig{leaf}"), "feeLamports": 5000}
            }))
    }
}

fn gateway() -> Arc<Gateway> {
    Arc::new(Gateway::new(GatewayConfig {
        max_in_flight: 3,
        call_options: CallOptions {
            retries: 2,
            timeout: Duration::from_secs(5),
        },
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        delay_step: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        decay_after: 2,
    }))
}

fn records(n: u64) -> Vec<Record> {
    (0..n)
        .map(|i| Record::new(format!("Drop #{i}"), format!("ipfs://bafy{i}")))
        .collect()
}

async fn orchestrator(
    server: &MockServer,
    dir: &Path,
    batch_size: usize,
) -> Orchestrator<RpcLedgerClient, FileJobStore> {
    let client = RpcLedgerClient::new(server.uri(), None).unwrap();
    let store = FileJobStore::open(dir).await.unwrap();
    Orchestrator::new(
        Arc::new(client),
        gateway(),
        Arc::new(store),
        OrchestratorConfig {
            batch_parallelism: 3,
            job_options: JobOptions {
                batch_size,
                max_failed_items: None,
            },
        },
    )
}

async fn minted_leaves(server: &MockServer) -> Vec<u64> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter_map(|req| serde_json::from_slice::<Value>(&req.body).ok())
        .filter(|body| body["method"] == "mintCompressed")
        .filter_map(|body| body["params"][0]["leafIndex"].as_u64())
        .collect()
}

#[tokio::test]
async fn mints_over_json_rpc_and_persists_every_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "getMintFee"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": {"lamports": 6000}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"params": [{"leafIndex": 2}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32602, "message": "invalid metadata", "data": {"fee": 2000}}
        })))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"params": [{"leafIndex": 5}]})))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "mintCompressed"})))
        .respond_with(Receipt {
            delay: Duration::ZERO,
        })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&server, dir.path(), 5).await;
    assert_eq!(orch.refresh_fee().await.unwrap(), 6000);

    let id = orch.create_job(records(12), 16).await.unwrap();
    orch.start(&id).await.unwrap();
    let job = orch.wait(&id).await.unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.succeeded_count, 11);
    assert_eq!(job.failed_count, 1);
    assert_eq!(job.accrued_cost, 11 * 5000 + 2000);
    assert_eq!(job.error_samples[0].leaf_index, 2);
    assert!(job.error_samples[0].error.contains("invalid metadata"));

    let params = job.tree_params.unwrap();
    assert_eq!(params.depth, 4);
    assert_eq!(job.estimated_cost, Some(params.rent_lamports() + 16 * 6000));
    assert_eq!(orch.gateway().stats().rate_limited, 1);

    let store = FileJobStore::open(dir.path()).await.unwrap();
    let stored = store.load(&id).await.unwrap().unwrap();
    assert_eq!(stored.job.status, JobStatus::Completed);
    assert_eq!(stored.outcomes.len(), 12);
    assert_eq!(stored.records.len(), 12);
}

#[tokio::test]
async fn paused_job_resumes_in_a_new_process_without_resubmitting() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "mintCompressed"})))
        .respond_with(Receipt {
            delay: Duration::from_millis(5),
        })
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let first = orchestrator(&server, dir.path(), 4).await;
    let id = first.create_job(records(20), 20).await.unwrap();
    first.start(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.pause(&id).await.unwrap();
    let paused = first.quiesce(&id).await.unwrap();
    assert_eq!(paused.status, JobStatus::Paused);
    assert!(paused.processed() < 20);

    let second = orchestrator(&server, dir.path(), 4).await;
    assert_eq!(second.recover().await.unwrap(), vec![id.clone()]);
    let recovered = second.get_status(&id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Paused);
    assert_eq!(recovered.succeeded_count, paused.succeeded_count);
    assert_eq!(recovered.tree_params, paused.tree_params);

    second.resume(&id).await.unwrap();
    let job = second.wait(&id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.succeeded_count, 20);

    let leaves = minted_leaves(&server).await;
    let unique: BTreeSet<u64> = leaves.iter().copied().collect();
    assert_eq!(leaves.len(), 20);
    assert_eq!(unique, (0..20).collect());
}

#[tokio::test]
async fn over_capacity_request_never_reaches_the_ledger() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(&server, dir.path(), 5).await;

    let id = orch
        .create_job(records(3), CapacityPlanner::max_capacity() * 2)
        .await
        .unwrap();
    assert!(orch.start(&id).await.is_err());
    assert_eq!(orch.get_status(&id).await.unwrap().status, JobStatus::Pending);
    assert!(minted_leaves(&server).await.is_empty());
}
