mod support;

use common::crypto::{decrypt_downlink, encrypt_downlink, encrypt_uplink};
use common::domain::{
    AesKey, ApplicationDownlink, ApplicationInvalidatedDownlinks, ApplicationJoinAccept,
    ApplicationLink, ApplicationUplink, EndDevice, KeyEnvelope, MessagePayloadFormatters,
    PayloadFormatter, Up,
};
use common::metrics::DropCause;
use std::collections::HashMap;
use std::time::Duration;

use application_server::testing::NsSession;
use support::{addr, ids, ids_with_addr, key, session, Harness};

fn downlink(session_key_id: &[u8], f_port: u32, f_cnt: u32, frm_payload: Vec<u8>) -> ApplicationDownlink {
    ApplicationDownlink {
        session_key_id: session_key_id.to_vec(),
        f_port,
        f_cnt,
        frm_payload,
        ..Default::default()
    }
}

async fn next_up(subscription: &mut application_server::domain::Subscription) -> Up {
    tokio::time::timeout(Duration::from_secs(1), subscription.recv())
        .await
        .expect("event before timeout")
        .expect("subscription open")
        .up
}

#[tokio::test]
async fn test_join_accept_then_uplink_on_pending_session() {
    // Arrange
    let harness = Harness::new();
    let mut device = EndDevice::new(ids());
    device.formatters = Some(MessagePayloadFormatters {
        up_formatter: PayloadFormatter::Javascript,
        up_formatter_parameter: "{'sum': sum(bytes_to_ints(input))}".to_string(),
        ..Default::default()
    });
    harness.store_device(device).await;
    let mut events = harness.subscribe().await;
    let dev_addr = addr(0x22);

    // Act
    harness
        .handle(
            ids_with_addr(dev_addr),
            Up::JoinAccept(ApplicationJoinAccept {
                session_key_id: vec![0x22],
                app_s_key: Some(KeyEnvelope::plain(key(0x22))),
                ..Default::default()
            }),
        )
        .await;
    let after_join = harness.device().await;
    harness
        .handle(
            ids_with_addr(dev_addr),
            Up::UplinkMessage(ApplicationUplink {
                session_key_id: vec![0x22],
                f_port: 22,
                f_cnt: 22,
                frm_payload: encrypt_uplink(&key(0x22), dev_addr, 22, &[0xc1]),
                ..Default::default()
            }),
        )
        .await;

    // Assert
    assert!(after_join.session.is_none());
    assert_eq!(
        after_join.pending_session.as_ref().map(|s| s.session_key_id().to_vec()),
        Some(vec![0x22])
    );

    let Up::JoinAccept(join_accept) = next_up(&mut events).await else {
        panic!("expected the join-accept first");
    };
    assert_eq!(join_accept.session_key_id, vec![0x22]);
    assert!(join_accept.app_s_key.is_none());

    let Up::UplinkMessage(uplink) = next_up(&mut events).await else {
        panic!("expected the uplink second");
    };
    assert_eq!(uplink.frm_payload, vec![0xc1]);
    assert_eq!(
        uplink.decoded_payload.as_ref().and_then(|p| p.get("sum")).cloned(),
        Some(serde_json::json!(193))
    );

    let device = harness.device().await;
    assert_eq!(
        device.session.as_ref().map(|s| s.session_key_id().to_vec()),
        Some(vec![0x22])
    );
    assert!(device.pending_session.is_none());
}

#[tokio::test]
async fn test_join_accept_requeues_invalidated_downlinks_on_current_session() {
    // Arrange
    let harness = Harness::new();
    let mut device = EndDevice::new(ids_with_addr(addr(0x22)));
    device.session = Some(session(&[0x22], addr(0x22), key(0x22), 0));
    harness.store_device(device).await;
    harness.network_server.set_sessions(
        &ids(),
        Some(NsSession::new(vec![0x22], addr(0x22), 0)),
        Some(NsSession::new(vec![0x33], addr(0x33), 0)),
    );
    let invalidated = vec![
        downlink(&[0x22], 11, 1, encrypt_downlink(&key(0x22), addr(0x22), 1, &[1; 4])),
        downlink(&[0x22], 22, 2, encrypt_downlink(&key(0x22), addr(0x22), 2, &[2; 4])),
    ];

    // Act
    harness
        .handle(
            ids_with_addr(addr(0x33)),
            Up::JoinAccept(ApplicationJoinAccept {
                session_key_id: vec![0x33],
                app_s_key: Some(KeyEnvelope::plain(key(0x33))),
                invalidated_downlinks: invalidated,
                pending_session: true,
                ..Default::default()
            }),
        )
        .await;

    // Assert
    let queue = harness.network_server.queue(&ids(), &[0x22]);
    assert_eq!(queue.len(), 2);
    assert_eq!((queue[0].f_port, queue[0].f_cnt), (11, 1));
    assert_eq!((queue[1].f_port, queue[1].f_cnt), (22, 2));
    assert_eq!(decrypt_downlink(&key(0x22), addr(0x22), 1, &queue[0].frm_payload), vec![1; 4]);
    assert_eq!(decrypt_downlink(&key(0x22), addr(0x22), 2, &queue[1].frm_payload), vec![2; 4]);
    assert!(harness.network_server.queue(&ids(), &[0x33]).is_empty());

    let device = harness.device().await;
    assert_eq!(
        device.pending_session.as_ref().map(|s| s.session_key_id().to_vec()),
        Some(vec![0x33])
    );
    assert_eq!(device.session.map(|s| s.last_a_f_cnt_down), Some(2));
}

#[tokio::test]
async fn test_nack_is_requeued_in_front_with_fresh_counters() {
    // Arrange
    let harness = Harness::new();
    let dev_addr = addr(0x33);
    let mut device = EndDevice::new(ids_with_addr(dev_addr));
    device.session = Some(session(&[0x33], dev_addr, key(0x33), 0));
    harness.store_device(device).await;
    let mut ns_session = NsSession::new(vec![0x33], dev_addr, 1);
    ns_session.queue = vec![downlink(
        &[0x33],
        22,
        2,
        encrypt_downlink(&key(0x33), dev_addr, 2, &[2; 4]),
    )];
    harness
        .network_server
        .set_sessions(&ids(), Some(ns_session), None);
    let mut events = harness.subscribe().await;

    // Act
    harness
        .handle(
            ids_with_addr(dev_addr),
            Up::DownlinkNack(downlink(
                &[0x33],
                11,
                1,
                encrypt_downlink(&key(0x33), dev_addr, 1, &[1; 4]),
            )),
        )
        .await;

    // Assert
    let Up::DownlinkNack(nack) = next_up(&mut events).await else {
        panic!("expected the nack to be forwarded");
    };
    assert_eq!(nack.frm_payload, vec![1; 4]);

    let queue = harness.network_server.queue(&ids(), &[0x33]);
    assert_eq!(queue.len(), 2);
    assert_eq!((queue[0].f_port, queue[0].f_cnt), (11, 2));
    assert_eq!((queue[1].f_port, queue[1].f_cnt), (22, 3));
    assert_eq!(decrypt_downlink(&key(0x33), dev_addr, 2, &queue[0].frm_payload), vec![1; 4]);
    assert_eq!(decrypt_downlink(&key(0x33), dev_addr, 3, &queue[1].frm_payload), vec![2; 4]);

    let device = harness.device().await;
    assert_eq!(device.session.map(|s| s.last_a_f_cnt_down), Some(3));
}

#[tokio::test]
async fn test_invalidated_queue_is_rebuilt_after_last_f_cnt_down() {
    // Arrange
    let harness = Harness::new();
    let dev_addr = addr(0x44);
    let mut device = EndDevice::new(ids_with_addr(dev_addr));
    device.session = Some(session(&[0x44], dev_addr, key(0x44), 80));
    harness.store_device(device).await;
    harness.network_server.set_sessions(
        &ids(),
        Some(NsSession::new(vec![0x44], dev_addr, 84)),
        None,
    );
    let unknown_key = AesKey([0x99; 16]);

    // Act
    harness
        .handle(
            ids_with_addr(dev_addr),
            Up::DownlinkQueueInvalidated(ApplicationInvalidatedDownlinks {
                downlinks: vec![
                    downlink(&[0x44], 1, 83, encrypt_downlink(&key(0x44), dev_addr, 83, &[1])),
                    downlink(
                        &[0x11, 0x22, 0x33, 0x44],
                        2,
                        84,
                        encrypt_downlink(&unknown_key, dev_addr, 84, &[2]),
                    ),
                    downlink(&[0x44], 3, 84, encrypt_downlink(&key(0x44), dev_addr, 84, &[3])),
                ],
                last_f_cnt_down: 84,
                session_key_id: vec![0x44],
            }),
        )
        .await;

    // Assert
    let queue = harness.network_server.queue(&ids(), &[0x44]);
    assert_eq!(queue.len(), 2);
    assert_eq!((queue[0].f_port, queue[0].f_cnt), (1, 85));
    assert_eq!((queue[1].f_port, queue[1].f_cnt), (3, 86));
    assert_eq!(decrypt_downlink(&key(0x44), dev_addr, 85, &queue[0].frm_payload), vec![1]);
    assert_eq!(decrypt_downlink(&key(0x44), dev_addr, 86, &queue[1].frm_payload), vec![3]);
    assert_eq!(
        harness
            .metrics
            .drops(DropCause::InvalidatedDownlinkUnknownSession),
        1
    );

    let device = harness.device().await;
    assert_eq!(device.session.map(|s| s.last_a_f_cnt_down), Some(86));
}

#[tokio::test]
async fn test_device_never_holds_more_than_two_sessions() {
    let harness = Harness::new();
    harness.store_device(EndDevice::new(ids())).await;

    for (id, byte) in [(0x01u8, 0x11u8), (0x02, 0x12), (0x03, 0x13)] {
        let dev_addr = addr(byte);
        harness
            .handle(
                ids_with_addr(dev_addr),
                Up::JoinAccept(ApplicationJoinAccept {
                    session_key_id: vec![id],
                    app_s_key: Some(KeyEnvelope::plain(key(id))),
                    ..Default::default()
                }),
            )
            .await;
        let device = harness.device().await;
        assert!(device.pending_session.is_some());

        harness
            .handle(
                ids_with_addr(dev_addr),
                Up::UplinkMessage(ApplicationUplink {
                    session_key_id: vec![id],
                    f_port: 1,
                    f_cnt: 1,
                    frm_payload: encrypt_uplink(&key(id), dev_addr, 1, &[id]),
                    ..Default::default()
                }),
            )
            .await;

        let device = harness.device().await;
        let sessions: Vec<Vec<u8>> = [device.session.as_ref(), device.pending_session.as_ref()]
            .into_iter()
            .flatten()
            .map(|s| s.session_key_id().to_vec())
            .collect();
        assert!(sessions.len() <= 2);
        assert_eq!(sessions, vec![vec![id]]);
        assert_eq!(device.ids.dev_addr, Some(dev_addr));
    }
}

#[tokio::test]
async fn test_frame_counters_increase_across_push_and_replace() {
    let harness = Harness::new();
    let dev_addr = addr(0x55);
    let mut device = EndDevice::new(ids_with_addr(dev_addr));
    device.session = Some(session(&[0x55], dev_addr, key(0x55), 0));
    harness.store_device(device).await;
    harness.network_server.set_sessions(
        &ids(),
        Some(NsSession::new(vec![0x55], dev_addr, 0)),
        None,
    );

    let mut last = 0;
    for round in 0..3u8 {
        let items = vec![downlink(&[], 1, 0, vec![round]), downlink(&[], 2, 0, vec![round])];
        if round % 2 == 0 {
            harness.queue.push(&ids(), items).await.unwrap();
        } else {
            harness.queue.replace(&ids(), items).await.unwrap();
        }
        let session = harness.device().await.session.unwrap();
        assert!(session.last_a_f_cnt_down > last);
        last = session.last_a_f_cnt_down;
    }
    assert_eq!(last, 6);

    let listed = harness.queue.list(&ids()).await.unwrap();
    let counters: Vec<u32> = listed.iter().map(|d| d.f_cnt).collect();
    assert_eq!(counters, vec![3, 4, 5, 6]);
    assert_eq!(listed[2].frm_payload, vec![2]);
}

#[tokio::test]
async fn test_skip_payload_crypto_forwards_payload_verbatim() {
    let link = ApplicationLink {
        skip_payload_crypto: Some(true),
        ..Default::default()
    };
    let harness = Harness::with_link(link, HashMap::new());
    let dev_addr = addr(0x66);
    let mut device = EndDevice::new(ids_with_addr(dev_addr));
    let mut wrapped = session(&[0x66], dev_addr, key(0x66), 0);
    wrapped.keys.app_s_key = Some(KeyEnvelope::wrapped("unknown-kek", vec![0xab; 24]));
    device.session = Some(wrapped);
    harness.store_device(device).await;
    let mut events = harness.subscribe().await;

    harness
        .handle(
            ids_with_addr(dev_addr),
            Up::UplinkMessage(ApplicationUplink {
                session_key_id: vec![0x66],
                f_port: 1,
                f_cnt: 7,
                frm_payload: vec![0xde, 0xad],
                ..Default::default()
            }),
        )
        .await;

    let Up::UplinkMessage(uplink) = next_up(&mut events).await else {
        panic!("expected the uplink to be forwarded");
    };
    assert_eq!(uplink.frm_payload, vec![0xde, 0xad]);
    assert!(uplink.decoded_payload.is_none());
    assert_eq!(
        uplink.app_s_key,
        Some(KeyEnvelope::wrapped("unknown-kek", vec![0xab; 24]))
    );
}
