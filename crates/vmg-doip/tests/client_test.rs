//! DoIP client integration tests against the in-process fake ZGW

use std::time::Duration;

use vmg_core::{CancelToken, ZgwEndpoint};
use vmg_doip::fake::{FakeZgw, FakeZgwOptions};
use vmg_doip::{DoipClient, DoipClientState, DoipError, ReadinessInfo, VciInfo};

fn sample_vci() -> Vec<VciInfo> {
    vec![
        VciInfo {
            ecu_id: "ECU_011".into(),
            sw_version: "1.1.2".into(),
            hw_version: "2.0".into(),
            serial_number: "091000001".into(),
        },
        VciInfo {
            ecu_id: "ECU_021".into(),
            sw_version: "1.0.5".into(),
            hw_version: "1.5".into(),
            serial_number: "091000002".into(),
        },
    ]
}

#[tokio::test]
async fn connect_activates_routing() {
    let zgw = FakeZgw::spawn(FakeZgwOptions::default()).await.unwrap();
    let mut client = DoipClient::new(zgw.endpoint());

    client.connect().await.unwrap();
    assert!(client.is_active());

    // connect() is idempotent while active
    client.connect().await.unwrap();
    assert_eq!(client.state(), DoipClientState::Active);

    client.disconnect();
    assert_eq!(client.state(), DoipClientState::Idle);
}

#[tokio::test]
async fn routing_denial_is_a_hard_failure() {
    let zgw = FakeZgw::spawn(FakeZgwOptions {
        routing_code: 0x06, // unsupported source address
        ..Default::default()
    })
    .await
    .unwrap();

    let mut client = DoipClient::new(zgw.endpoint());
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, DoipError::Protocol(_)), "got {:?}", err);
    assert_eq!(client.state(), DoipClientState::Error);
}

#[tokio::test]
async fn vci_happy_path_returns_trimmed_records() {
    let zgw = FakeZgw::spawn(FakeZgwOptions {
        vci_records: sample_vci(),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    client.request_vci_collection().await.unwrap();
    let report = client.request_vci_report().await.unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report[0].ecu_id, "ECU_011");
    assert_eq!(report[0].sw_version, "1.1.2");
    assert_eq!(report[1].serial_number, "091000002");
}

#[tokio::test]
async fn readiness_report_decodes_thresholded_fields() {
    let zgw = FakeZgw::spawn(FakeZgwOptions {
        readiness_records: vec![ReadinessInfo {
            ecu_id: "ECU_011".into(),
            vehicle_parked: true,
            engine_off: true,
            battery_voltage_mv: 12600,
            available_memory_kb: 4096,
            all_doors_closed: true,
            compatible: true,
            ready_for_update: true,
        }],
        ..Default::default()
    })
    .await
    .unwrap();

    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    client.request_readiness_check().await.unwrap();
    let report = client.request_readiness_report().await.unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(report[0].battery_voltage_mv, 12600);
    assert_eq!(report[0].available_memory_kb, 4096);
    assert!(report[0].ready_for_update);
}

#[tokio::test]
async fn routine_failure_status_aborts() {
    let zgw = FakeZgw::spawn(FakeZgwOptions {
        routine_status: 0x01,
        ..Default::default()
    })
    .await
    .unwrap();

    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    let err = client.request_vci_collection().await.unwrap_err();
    assert!(matches!(err, DoipError::Protocol(_)));
}

#[tokio::test]
async fn block_transfer_counter_wraps_mod_256() {
    let zgw = FakeZgw::spawn(FakeZgwOptions::default()).await.unwrap();
    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    // 260 KiB => 260 blocks of 1 KiB
    let firmware = vec![0x5A; 260 * 1024];
    client
        .send_firmware("ECU_011", &firmware, &CancelToken::new())
        .await
        .unwrap();

    let counters = zgw.block_counters();
    assert_eq!(counters.len(), 260);
    assert_eq!(counters[0], 1);
    assert_eq!(counters[254], 255);
    assert_eq!(counters[255], 0); // wrap after 255
    assert_eq!(counters[256], 1);
    assert_eq!(&counters[255..260], &[0, 1, 2, 3, 4]);

    assert_eq!(zgw.declared_size(), 260 * 1024);
    assert_eq!(zgw.firmware_bytes(), 260 * 1024);
}

#[tokio::test]
async fn rejected_block_aborts_transfer() {
    let zgw = FakeZgw::spawn(FakeZgwOptions {
        reject_block: Some(2),
        ..Default::default()
    })
    .await
    .unwrap();

    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    let firmware = vec![0xA5; 8 * 1024];
    let err = client
        .send_firmware("ECU_012", &firmware, &CancelToken::new())
        .await
        .unwrap_err();
    match err {
        DoipError::Uds { service, code } => {
            assert_eq!(service, 0x36);
            assert_eq!(code, 0x31);
        }
        other => panic!("expected UDS negative response, got {:?}", other),
    }

    // Only blocks 0..=2 were attempted
    assert_eq!(zgw.block_counters(), vec![1, 2, 3]);
}

#[tokio::test]
async fn short_firmware_fits_single_block() {
    let zgw = FakeZgw::spawn(FakeZgwOptions::default()).await.unwrap();
    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    client
        .send_firmware("ECU_013", &[1, 2, 3], &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(zgw.block_counters(), vec![1]);
    assert_eq!(zgw.firmware_bytes(), 3);
}

#[tokio::test]
async fn cancel_mid_transfer_stops_between_blocks() {
    let zgw = FakeZgw::spawn(FakeZgwOptions::default()).await.unwrap();
    let mut client = DoipClient::new(zgw.endpoint());
    client.connect().await.unwrap();

    let cancel = CancelToken::new();
    let transfer_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        // 1 MiB => 1024 blocks of 1 KiB
        let firmware = vec![0xEE; 1024 * 1024];
        client
            .send_firmware("ECU_014", &firmware, &transfer_cancel)
            .await
    });

    // Trip the token once a few blocks have gone through
    loop {
        if zgw.block_counters().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(DoipError::Cancelled)), "got {:?}", result);

    // The transfer stopped between blocks, well before all 1024 were sent
    let sent = zgw.block_counters().len();
    assert!(sent >= 3, "saw {} blocks", sent);
    assert!(sent < 1024, "transfer ran to completion ({} blocks)", sent);
}
