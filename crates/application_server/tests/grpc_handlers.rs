mod support;

use application_server::domain::Distributor;
use application_server::grpc::{AppAsHandler, NsAsHandler};
use application_server::nats::{uplink_pool, UplinkBatch};
use application_server::testing::NsSession;
use common::auth::{parse_api_keys, ClusterAuth, StaticRightsFetcher};
use common::domain::{ApplicationServiceData, ApplicationUp, EndDevice, Up};
use common::metrics::{AsMetrics, DropCause};
use common::proto::app_as_server::AppAs;
use common::proto::ns_as_server::NsAs;
use common::proto::{
    to_proto_application_ids, to_proto_application_up, to_proto_end_device_ids,
    ApplicationDownlink, DownlinkQueueRequest, NsAsHandleUplinkRequest,
};
use common::workerpool::{WorkerPool, WorkerPoolConfig};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

use support::{addr, ids, ids_with_addr, key, session, Harness, APP_ID};

const CLUSTER_KEY: &str = "00112233";

fn service_data(service: &str) -> common::proto::ApplicationUp {
    to_proto_application_up(ApplicationUp::new(
        ids(),
        Up::ServiceData(ApplicationServiceData {
            service: service.to_string(),
            ..Default::default()
        }),
    ))
}

fn ns_as(harness: &Harness) -> NsAsHandler {
    NsAsHandler::new(
        uplink_pool(
            harness.upstream.clone(),
            harness.metrics.clone(),
            WorkerPoolConfig::default(),
            CancellationToken::new(),
        ),
        ClusterAuth::from_hex_list(CLUSTER_KEY).unwrap(),
        harness.metrics.clone(),
    )
}

fn with_authorization<T>(message: T, value: &str) -> Request<T> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert("authorization", value.parse().unwrap());
    request
}

fn app_as(harness: &Harness) -> AppAsHandler {
    let keys = parse_api_keys(&format!(
        "reader=token-1:{}:application_traffic_read,writer=token-2:{}:application_traffic_read+application_traffic_down_write",
        APP_ID, APP_ID
    ))
    .unwrap();
    AppAsHandler::new(
        harness.queue.clone(),
        harness.distributor.clone() as Arc<dyn Distributor>,
        Arc::new(StaticRightsFetcher::new(keys)),
    )
}

#[tokio::test]
async fn test_handle_uplink_requires_cluster_key() {
    let harness = Harness::new();
    let handler = ns_as(&harness);
    let batch = NsAsHandleUplinkRequest {
        application_ups: vec![service_data("first")],
    };

    let missing = handler
        .handle_uplink(Request::new(batch.clone()))
        .await
        .unwrap_err();
    assert_eq!(missing.code(), Code::Unauthenticated);

    let unknown = handler
        .handle_uplink(with_authorization(batch, "ClusterKey 99887766"))
        .await
        .unwrap_err();
    assert_eq!(unknown.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_handle_uplink_preserves_batch_order() {
    // Arrange
    let harness = Harness::new();
    let mut events = harness.subscribe().await;
    let handler = ns_as(&harness);
    let batch = NsAsHandleUplinkRequest {
        application_ups: vec![service_data("first"), service_data("second"), service_data("third")],
    };

    // Act
    handler
        .handle_uplink(with_authorization(batch, &format!("ClusterKey {}", CLUSTER_KEY)))
        .await
        .unwrap();

    // Assert
    let mut services = Vec::new();
    for _ in 0..3 {
        let up = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event before timeout")
            .expect("subscription open");
        assert!(up.correlation_ids.iter().any(|id| id.starts_with("as:up:")));
        let Up::ServiceData(data) = up.up else {
            panic!("expected service data");
        };
        services.push(data.service);
    }
    assert_eq!(services, vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_handle_uplink_rejects_when_pool_saturated() {
    // Arrange
    let metrics = AsMetrics::shared();
    let pool = WorkerPool::from_fn(
        WorkerPoolConfig {
            max_workers: 0,
            queue_size: 0,
            ..Default::default()
        },
        CancellationToken::new(),
        |batch: UplinkBatch| async move {
            let _ = batch.done.send(());
        },
    );
    let handler = NsAsHandler::new(
        pool,
        ClusterAuth::from_hex_list(CLUSTER_KEY).unwrap(),
        metrics.clone(),
    );
    let batch = NsAsHandleUplinkRequest {
        application_ups: vec![service_data("first")],
    };

    // Act
    let status = handler
        .handle_uplink(with_authorization(batch, &format!("ClusterKey {}", CLUSTER_KEY)))
        .await
        .unwrap_err();

    // Assert
    assert_eq!(status.code(), Code::ResourceExhausted);
    assert_eq!(metrics.drops(DropCause::PoolFull), 1);
}

#[tokio::test]
async fn test_subscribe_streams_application_traffic() {
    let harness = Harness::new();
    let handler = app_as(&harness);

    let denied = handler
        .subscribe(with_authorization(
            to_proto_application_ids(ids().application_ids),
            "Bearer unknown",
        ))
        .await;
    assert_eq!(denied.err().map(|s| s.code()), Some(Code::PermissionDenied));

    let mut stream = handler
        .subscribe(with_authorization(
            to_proto_application_ids(ids().application_ids),
            "Bearer reader",
        ))
        .await
        .unwrap()
        .into_inner();
    harness
        .upstream
        .handle(ApplicationUp::new(
            ids(),
            Up::ServiceData(ApplicationServiceData {
                service: "geo".to_string(),
                ..Default::default()
            }),
        ))
        .await;

    let up = tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("event before timeout")
        .expect("stream open")
        .unwrap();
    assert_eq!(up.end_device_ids.unwrap().device_id, ids().device_id);
}

#[tokio::test]
async fn test_downlink_queue_rights_and_roundtrip() {
    // Arrange
    let harness = Harness::new();
    let dev_addr = addr(0x66);
    let mut device = EndDevice::new(ids_with_addr(dev_addr));
    device.session = Some(session(&[0x66], dev_addr, key(0x66), 0));
    harness.store_device(device).await;
    harness.network_server.set_sessions(
        &ids(),
        Some(NsSession::new(vec![0x66], dev_addr, 0)),
        None,
    );
    let handler = app_as(&harness);
    let request = DownlinkQueueRequest {
        end_device_ids: Some(to_proto_end_device_ids(ids())),
        downlinks: vec![ApplicationDownlink {
            f_port: 1,
            frm_payload: vec![0x01, 0x02],
            ..Default::default()
        }],
    };

    // Act
    let denied = handler
        .downlink_queue_push(with_authorization(request.clone(), "Bearer reader"))
        .await
        .unwrap_err();
    handler
        .downlink_queue_push(with_authorization(request, "Bearer writer"))
        .await
        .unwrap();
    let listed = handler
        .downlink_queue_list(with_authorization(to_proto_end_device_ids(ids()), "Bearer reader"))
        .await
        .unwrap()
        .into_inner();

    // Assert
    assert_eq!(denied.code(), Code::PermissionDenied);
    assert_eq!(listed.downlinks.len(), 1);
    assert_eq!(listed.downlinks[0].f_cnt, 1);
    assert_eq!(listed.downlinks[0].frm_payload, vec![0x01, 0x02]);
    assert_eq!(listed.downlinks[0].session_key_id, vec![0x66]);
}
