//! End-to-end tests driving a bridge against the in-process transport.
//!
//! The model answers on tokio's blocking pool; the test thread plays the
//! caller and ticks the bridge until the expected resumptions arrive.

mod helpers;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::polling::tick_until;
use helpers::scheduler::RecordingScheduler;
use inference_bridge::bridge::protocol::{InputResult, Payload, Request};
use inference_bridge::{
    BridgeSettings, CancelReason, InferenceBridge, InferenceClient, LatentInfo, LatentState,
    LocalTransport, OutputSlot, OwnerId, Transport,
};

fn ping_pong(request: &Request) -> Result<Payload, String> {
    match &request.payload {
        Payload::Structured(text) if text == "ping" => Ok(Payload::from("pong")),
        Payload::Structured(text) => Ok(Payload::Structured(text.to_uppercase())),
        Payload::Raw(_) => {
            // Long enough for the test to disconnect first
            std::thread::sleep(Duration::from_millis(300));
            Ok(Payload::Raw(vec![0.0]))
        }
    }
}

fn failing(_: &Request) -> Result<Payload, String> {
    Err("no weights loaded".to_string())
}

async fn connected_bridge<F>(model: F) -> InferenceBridge<LocalTransport>
where
    F: Fn(&Request) -> Result<Payload, String> + Send + Sync + 'static,
{
    let mut bridge = InferenceBridge::new(BridgeSettings::default(), |sink| {
        LocalTransport::spawn("test-model", model, sink)
    })
    .expect("default settings are valid");

    let mut scheduler = RecordingScheduler::new();
    tick_until(&mut bridge, &mut scheduler, |b, _| b.is_connected())
        .await
        .expect("local transport should connect");
    bridge
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latent_ping_resumes_with_pong() {
    let mut bridge = connected_bridge(ping_pong).await;
    let slot = OutputSlot::new();

    let token = bridge
        .send_input_latent(
            "ping".to_string(),
            Some("f"),
            LatentInfo::new(OwnerId(1), 42),
            slot.clone(),
        )
        .unwrap();
    assert_eq!(bridge.latent_state(token), LatentState::Waiting);

    let mut scheduler = RecordingScheduler::new();
    let report = tick_until(&mut bridge, &mut scheduler, |_, r| r.resumed == 1)
        .await
        .expect("call should resume");

    assert_eq!(report.resolved, 1);
    assert_eq!(slot.take(), Some(Ok("pong".to_string())));
    let resumed = scheduler.resumed();
    assert_eq!(resumed[0].token, token);
    assert_eq!(resumed[0].call_site.linkage, 42);
    assert_eq!(resumed[0].state, LatentState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_latent_call_fails_on_disconnect() {
    let mut bridge = connected_bridge(ping_pong).await;
    let slot = OutputSlot::new();

    let token = bridge
        .send_raw_input_latent(
            vec![1.0, 2.0],
            Some("f"),
            LatentInfo::new(OwnerId(1), 0),
            slot.clone(),
        )
        .unwrap();
    bridge.sink().disconnected().unwrap();

    let mut scheduler = RecordingScheduler::new();
    tick_until(&mut bridge, &mut scheduler, |_, r| r.resumed == 1)
        .await
        .expect("disconnect should resume the call");

    let failure = slot.take().unwrap().unwrap_err();
    assert_eq!(failure.reason, CancelReason::Disconnected);
    assert!(!bridge.is_pending(token));

    // The late answer is dropped, not delivered
    tokio::time::sleep(Duration::from_millis(400)).await;
    bridge.tick(&mut scheduler);
    assert_eq!(scheduler.count(), 1);
    assert_eq!(bridge.diagnostics().unknown_tokens, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fire_and_forget_results_reach_every_subscriber() {
    let mut bridge = connected_bridge(ping_pong).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for _ in 0..3 {
        let seen = Arc::clone(&seen);
        bridge
            .notifications_mut()
            .on_input_result
            .subscribe(move |r: &InputResult<String>| {
                seen.lock()
                    .unwrap()
                    .push((r.data.clone(), r.function_name.clone()))
            });
    }

    bridge.send_input("hello".to_string(), None).unwrap();
    assert_eq!(bridge.pending_count(), 0);

    let mut scheduler = RecordingScheduler::new();
    tick_until(&mut bridge, &mut scheduler, |_, r| r.broadcasts == 1)
        .await
        .expect("result should be broadcast");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(
        seen.iter()
            .all(|(data, name)| data == "HELLO" && name == "onJsonInput")
    );
    assert_eq!(scheduler.count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn model_errors_fail_the_latent_call() {
    let mut bridge = connected_bridge(failing).await;
    let slot = OutputSlot::new();
    bridge
        .send_input_latent(
            "x".to_string(),
            None,
            LatentInfo::new(OwnerId(1), 0),
            slot.clone(),
        )
        .unwrap();

    let mut scheduler = RecordingScheduler::new();
    tick_until(&mut bridge, &mut scheduler, |_, r| r.resumed == 1)
        .await
        .expect("failure should resume the call");

    assert_eq!(
        slot.take().unwrap().unwrap_err().reason,
        CancelReason::BackendFailure("no weights loaded".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_transport_disconnects_the_bridge() {
    let mut bridge = connected_bridge(ping_pong).await;
    let disconnects = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&disconnects);
    bridge
        .notifications_mut()
        .on_disconnected
        .subscribe(move |_| *counter.lock().unwrap() += 1);

    bridge.transport_mut().close();

    let mut scheduler = RecordingScheduler::new();
    tick_until(&mut bridge, &mut scheduler, |b, _| !b.is_connected())
        .await
        .expect("worker should report the disconnect");
    assert_eq!(*disconnects.lock().unwrap(), 1);

    let slot = OutputSlot::new();
    bridge
        .send_input_latent(
            "ping".to_string(),
            None,
            LatentInfo::new(OwnerId(1), 0),
            slot.clone(),
        )
        .unwrap();
    bridge.tick(&mut scheduler);
    assert_eq!(
        slot.take().unwrap().unwrap_err().reason,
        CancelReason::NotConnected
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn many_outstanding_calls_each_resume_once() {
    let mut bridge = connected_bridge(ping_pong).await;
    let slots: Vec<OutputSlot<String>> = (0..50).map(|_| OutputSlot::new()).collect();
    let mut tokens = Vec::new();
    for (i, slot) in slots.iter().enumerate() {
        tokens.push(
            bridge
                .send_input_latent(
                    format!("m{i}"),
                    None,
                    LatentInfo::new(OwnerId(7), i as u32),
                    slot.clone(),
                )
                .unwrap(),
        );
    }

    let mut sorted = tokens.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), tokens.len());

    let mut scheduler = RecordingScheduler::new();
    tick_until(&mut bridge, &mut scheduler, |_, r| r.resumed == 50)
        .await
        .expect("every call should resume");

    for (i, slot) in slots.iter().enumerate() {
        assert_eq!(slot.get(), Some(Ok(format!("M{i}"))));
    }
    assert_eq!(bridge.pending_count(), 0);
}
