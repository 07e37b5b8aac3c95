// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use chrono::{TimeZone, Utc};
use fluxion_control::{CloudScheduleControl, FakeClock};
use fluxion_solis::client::{CloudTransport, PATH_READ};
use fluxion_solis::registers::{
    BATTERY_FORCE_CHARGE_SOC, CHARGE_DISCHARGE_SETTINGS, STORAGE_MODE, TOU_MODE_INDICATOR,
};
use fluxion_solis::{
    BackendSettings, CloudRegisterBackend, HttpTransport, SimulatedCloud, SolisClient, SolisError,
};
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn fixed_clock() -> FakeClock {
    FakeClock::new(Utc.with_ymd_and_hms(2025, 10, 18, 12, 0, 0).unwrap())
}

#[tokio::test]
async fn test_http_transport_signs_request() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/api/atRead")
        .match_header("authorization", "API key-1:LO0cHEew9I0HzY/4jj5cO9HPT0Q=")
        .match_header("content-md5", "ajq8VxFN86TUnMtOvhr56A==")
        .match_header("date", "Sat, 18 Oct 2025 12:00:00 GMT")
        .match_header("content-type", "application/json")
        .with_status(200)
        .with_body(
            json!({"success": true, "code": "0", "msg": "success", "data": {"msg": "35"}})
                .to_string(),
        )
        .create_async()
        .await;

    let transport =
        HttpTransport::new(server.url(), "key-1", "test-secret", Arc::new(fixed_clock())).unwrap();
    let data = transport
        .post(PATH_READ, r#"{"inverterSn":"1234567890","cid":"636"}"#)
        .await
        .unwrap();

    assert_eq!(data["msg"], "35");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_http_error_status_is_reported() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/api/atRead")
        .with_status(403)
        .with_body("forbidden")
        .create_async()
        .await;

    let transport =
        HttpTransport::new(server.url(), "k", "s", Arc::new(fixed_clock())).unwrap();
    let err = transport.post(PATH_READ, "{}").await.unwrap_err();

    assert!(matches!(err, SolisError::ApiError { status: 403, .. }));
    assert!(!err.is_transient());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_backend_reads_through_http() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/api/atRead")
        .match_body(Matcher::PartialJson(json!({"inverterSn": "SN1", "cid": "636"})))
        .with_status(200)
        .with_body(json!({"success": true, "code": "0", "data": {"msg": "33"}}).to_string())
        .create_async()
        .await;

    let clock = Arc::new(fixed_clock());
    let client = SolisClient::connect(server.url(), "k", "s", clock).unwrap();
    let backend = CloudRegisterBackend::new("solis", "SN1", client, BackendSettings::default());

    assert_eq!(backend.read_register(STORAGE_MODE).await.unwrap(), "33");
    assert_eq!(backend.cached(STORAGE_MODE).as_deref(), Some("33"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_retry_budget_exhaustion() {
    let cloud = SimulatedCloud::new();
    cloud.fail_always();
    let clock = fixed_clock();
    let client = SolisClient::new(Arc::new(cloud.clone()), Arc::new(clock.clone()));
    let backend = CloudRegisterBackend::new("solis", "SN1", client, BackendSettings::default());

    let err = backend.read_register(STORAGE_MODE).await.unwrap_err();

    match err {
        SolisError::RetryExhausted {
            attempts, elapsed, ..
        } => {
            assert_eq!(attempts, 8);
            assert_eq!(elapsed, Duration::from_secs(30));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(cloud.requests().len(), 8);

    let sleeps = clock.sleeps();
    assert_eq!(sleeps.first(), Some(&Duration::from_secs(1)));
    assert_eq!(sleeps.get(1), Some(&Duration::from_millis(1500)));
    assert_eq!(sleeps.last(), Some(&Duration::from_secs_f64(9.21875)));
}

#[tokio::test]
async fn test_schedule_round_trip_through_backend() {
    let cloud = SimulatedCloud::new();
    cloud.set_register(TOU_MODE_INDICATOR, "0");
    cloud.set_register(
        CHARGE_DISCHARGE_SETTINGS,
        "0,0,00:00-00:00,00:00-00:00,0,0,00:00-00:00,00:00-00:00,0,0,00:00-00:00,00:00-00:00",
    );
    cloud.set_register(STORAGE_MODE, "33");
    cloud.set_register(BATTERY_FORCE_CHARGE_SOC, "50");
    let client = SolisClient::new(Arc::new(cloud.clone()), Arc::new(fixed_clock()));
    let backend = CloudRegisterBackend::new("solis", "SN1", client, BackendSettings::default());

    let mut schedule = backend.read_schedule().await.unwrap();
    assert_eq!(schedule.charge, None);

    let start = chrono::NaiveTime::from_hms_opt(2, 0, 0).unwrap();
    let end = chrono::NaiveTime::from_hms_opt(5, 30, 0).unwrap();
    schedule.charge = Some((start, end));
    schedule.charge_rate_w = 3224.0;
    schedule.target_soc = Some(90.0);
    assert!(backend.write_schedule(&schedule).await.unwrap());

    assert_eq!(
        cloud.register(CHARGE_DISCHARGE_SETTINGS).as_deref(),
        Some("62,0,02:00-05:30,00:00-00:00,0,0,00:00-00:00,00:00-00:00,0,0,00:00-00:00,00:00-00:00")
    );
    assert_eq!(cloud.register(BATTERY_FORCE_CHARGE_SOC).as_deref(), Some("90"));
    assert_eq!(cloud.register(STORAGE_MODE).as_deref(), Some("35"));

    let reread = backend.read_schedule().await.unwrap();
    assert_eq!(reread.charge, Some((start, end)));
    assert_eq!(reread.target_soc, Some(90.0));
}
