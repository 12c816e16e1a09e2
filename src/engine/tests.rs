use super::*;
use crate::animation::sequence::PlaybackState;
use crate::expression::table::EmotionWeightTable;
use serde_json::json;

const FRAME: Duration = Duration::from_millis(16);

fn weights(pairs: &[(&str, f32)]) -> EmotionWeights {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

/// Two-shape table so interpolated values are easy to predict.
fn test_engine() -> AvatarEngine {
    let mut table = EmotionWeightTable::empty();
    table.insert("happy", weights(&[("a", 1.0)]));
    table.insert("sad", weights(&[("b", 1.0)]));
    AvatarEngine::with_table(EngineConfig::default(), table)
}

fn trajectory_frame(duration: f32, keyframes: serde_json::Value) -> String {
    json!({
        "type": "emotionalTrajectory",
        "payload": { "duration": duration, "keyframes": keyframes }
    })
    .to_string()
}

fn chat_with_sequence(sequence: serde_json::Value) -> String {
    json!({
        "type": "chatMessage",
        "payload": { "text": "hello", "bodyAnimationSequence": sequence }
    })
    .to_string()
}

fn viseme_frame(jaw: f32) -> String {
    json!({ "type": "viseme", "payload": { "weights": { "jawOpen": jaw } } }).to_string()
}

fn current_name(engine: &AvatarEngine) -> Option<String> {
    engine.current_animation().map(|a| a.name)
}

// ── Expression ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn idle_engine_holds_neutral() {
    let engine = test_engine();
    engine.set_shape_dictionary(["a", "b"]);

    for _ in 0..30 {
        let frame = engine.tick(FRAME);
        assert_eq!(frame, weights(&[("a", 0.0), ("b", 0.0)]));
        tokio::time::sleep(FRAME).await;
    }
}

#[tokio::test(start_paused = true)]
async fn trajectory_hits_endpoints_exactly() {
    let engine = test_engine();
    engine
        .handle_transport_message(&trajectory_frame(
            2.0,
            json!([{ "tag": "happy", "proportion": 0.0 }, { "tag": "sad", "proportion": 1.0 }]),
        ))
        .unwrap();

    let t0 = Instant::now();
    assert_eq!(engine.target_weights_at(t0), weights(&[("a", 1.0)]));

    let mid = engine.target_weights_at(t0 + Duration::from_secs(1));
    assert_eq!(mid, weights(&[("a", 0.5), ("b", 0.5)]));

    assert_eq!(
        engine.target_weights_at(t0 + Duration::from_secs(2)),
        weights(&[("b", 1.0)])
    );
}

#[tokio::test(start_paused = true)]
async fn completed_trajectory_holds_last_expression() {
    let engine = test_engine();
    engine
        .handle_transport_message(&trajectory_frame(
            1.0,
            json!([{ "tag": "happy", "proportion": 0.0 }, { "tag": "sad", "proportion": 0.5 }]),
        ))
        .unwrap();

    let t0 = Instant::now();
    engine.tick_at(t0, FRAME);
    engine.tick_at(t0 + Duration::from_secs(3), FRAME);
    assert!(lock(engine.store()).trajectory.is_completed());

    // Much later the frozen value is unchanged.
    assert_eq!(
        engine.target_weights_at(t0 + Duration::from_secs(60)),
        weights(&[("b", 1.0)])
    );
}

#[tokio::test(start_paused = true)]
async fn trajectory_clock_starts_at_audio_start() {
    let engine = test_engine();
    engine.speech_started(SpeechCue::with_duration(4.0));
    tokio::time::sleep(Duration::from_secs(1)).await;

    engine
        .handle_transport_message(&trajectory_frame(
            2.0,
            json!([{ "tag": "happy", "proportion": 0.0 }, { "tag": "sad", "proportion": 1.0 }]),
        ))
        .unwrap();
    let target = engine.target_weights_at(Instant::now());
    assert_eq!(target, weights(&[("a", 0.5), ("b", 0.5)]));
}

#[tokio::test(start_paused = true)]
async fn smoothing_eases_in_then_settles() {
    let engine = test_engine();
    engine.set_shape_dictionary(["a"]);
    engine.set_override("a", 1.0).unwrap();

    let first = engine.tick(Duration::from_secs_f32(1.0 / 60.0))["a"];
    assert!(first > 0.0 && first < 1.0, "first frame {}", first);

    let second = engine.tick(Duration::from_secs_f32(1.0 / 60.0))["a"];
    assert!(second > first);

    assert_eq!(engine.tick(Duration::from_secs(1))["a"], 1.0);
    assert_eq!(engine.composite_weights()["a"], 1.0);
}

// ── Overrides ────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn override_replaces_trajectory_blend() {
    let engine = test_engine();
    engine
        .handle_transport_message(&trajectory_frame(
            5.0,
            json!([{ "tag": "sad", "proportion": 0.0 }]),
        ))
        .unwrap();
    engine.set_override("a", 0.9).unwrap();

    let target = engine.target_weights_at(Instant::now());
    assert_eq!(target, weights(&[("a", 0.9)]));
}

#[tokio::test(start_paused = true)]
async fn zero_override_falls_back_to_trajectory() {
    let engine = test_engine();
    engine
        .handle_transport_message(&trajectory_frame(
            5.0,
            json!([{ "tag": "sad", "proportion": 0.0 }]),
        ))
        .unwrap();
    engine.set_override("a", 0.0).unwrap();

    let target = engine.target_weights_at(Instant::now());
    assert_eq!(target, weights(&[("b", 1.0)]));
}

#[test]
fn overrides_are_validated_against_mesh() {
    let engine = test_engine();
    engine.set_shape_dictionary(["a", "b"]);

    assert!(matches!(
        engine.set_override("tail", 0.5),
        Err(EngineError::UnknownShape(_))
    ));
    assert!(matches!(
        engine.set_override("a", f32::NAN),
        Err(EngineError::InvalidWeight { .. })
    ));

    let bad = weights(&[("a", 0.3), ("b", f32::INFINITY)]);
    assert!(engine.set_overrides(bad).is_err());
    assert!(engine.overrides().is_empty());

    engine.set_overrides(weights(&[("a", 0.3), ("b", 0.4)])).unwrap();
    assert_eq!(engine.overrides().len(), 2);

    engine.clear_overrides();
    assert!(engine.overrides().is_empty());
}

#[test]
fn preset_loads_table_entry_as_overrides() {
    let engine = AvatarEngine::new(EngineConfig::default());
    engine.set_shape_dictionary(["mouthSmileLeft", "jawOpen"]);

    engine.apply_preset("Happy").unwrap();
    assert_eq!(engine.overrides(), weights(&[("mouthSmileLeft", 0.8)]));

    let err = engine.apply_preset("melancholic").unwrap_err();
    assert!(matches!(err, EngineError::UnknownEmotion(_)));
}

#[test]
fn new_dictionary_drops_foreign_overrides() {
    let engine = test_engine();
    engine.set_override("a", 0.5).unwrap();
    engine.set_override("z", 0.5).unwrap();
    engine.set_shape_dictionary(["a"]);
    assert_eq!(engine.overrides(), weights(&[("a", 0.5)]));
}

// ── Lip-sync ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn lip_sync_only_applies_while_speaking() {
    let engine = test_engine();
    engine.set_lip_sync(weights(&[("jawOpen", 0.6)]));
    assert!(!engine.target_weights_at(Instant::now()).contains_key("jawOpen"));

    engine.speech_started(SpeechCue::default());
    assert_eq!(engine.target_weights_at(Instant::now())["jawOpen"], 0.6);

    engine.speech_stopped();
    assert!(!engine.target_weights_at(Instant::now()).contains_key("jawOpen"));
    // The stale frame is still there, just gated.
    assert_eq!(lock(engine.store()).lip_sync.raw()["jawOpen"], 0.6);
}

#[tokio::test(start_paused = true)]
async fn lip_sync_overwrites_overrides_on_mouth_shapes() {
    let engine = test_engine();
    engine.set_overrides(weights(&[("jawOpen", 0.1), ("a", 0.7)])).unwrap();
    engine.speech_started(SpeechCue::default());
    engine.set_audio_level(0.4);

    let target = engine.target_weights_at(Instant::now());
    assert_eq!(target["jawOpen"], 0.4);
    assert_eq!(target["a"], 0.7);
}

#[tokio::test(start_paused = true)]
async fn viseme_burst_keeps_last_frame() {
    let engine = test_engine();
    engine.speech_started(SpeechCue::default());

    for i in 0..50 {
        engine
            .handle_transport_message(&viseme_frame(i as f32 / 100.0))
            .unwrap();
        tokio::time::advance(Duration::from_micros(200)).await;
    }
    // Only the first frame went through so far.
    assert_eq!(lock(engine.store()).lip_sync.raw()["jawOpen"], 0.0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(lock(engine.store()).lip_sync.raw()["jawOpen"], 0.49);
}

// ── Body animation ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn sequence_follows_speech_timing() {
    let engine = test_engine();
    engine
        .handle_transport_message(&chat_with_sequence(json!([
            { "name": "Wave", "proportion": 0.0 },
            { "name": "Nod", "proportion": 0.3 },
            { "name": "Bow", "proportion": 0.7 }
        ])))
        .unwrap();
    assert_eq!(engine.playback_state(), PlaybackState::Stopped);

    engine.speech_started(SpeechCue::with_duration(10.0));
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));

    tokio::time::sleep(Duration::from_millis(2990)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Nod"));
    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Bow"));
}

#[tokio::test(start_paused = true)]
async fn speech_end_returns_to_idle() {
    let engine = test_engine();
    engine
        .handle_transport_message(&chat_with_sequence(json!([
            { "name": "Wave", "proportion": 0.0 },
            { "name": "Nod", "proportion": 0.3 },
            { "name": "Bow", "proportion": 0.7 }
        ])))
        .unwrap();
    engine.speech_started(SpeechCue::with_duration(10.0));

    tokio::time::sleep(Duration::from_secs(2)).await;
    engine.speech_stopped();
    assert_eq!(engine.pending_triggers(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Idle"));
    assert_eq!(engine.playback_state(), PlaybackState::Stopped);

    // The sequence survives for the next utterance.
    engine.speech_started(SpeechCue::with_duration(10.0));
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
}

#[tokio::test(start_paused = true)]
async fn new_trajectory_disarms_running_sequence() {
    let engine = test_engine();
    engine
        .handle_transport_message(&chat_with_sequence(json!([
            { "name": "Wave", "proportion": 0.0 },
            { "name": "Nod", "proportion": 0.5 }
        ])))
        .unwrap();
    engine.speech_started(SpeechCue::with_duration(4.0));
    tokio::time::sleep(Duration::from_secs(1)).await;

    engine
        .handle_transport_message(&trajectory_frame(
            3.0,
            json!([{ "tag": "happy", "proportion": 0.0 }]),
        ))
        .unwrap();
    assert_eq!(engine.playback_state(), PlaybackState::Stopped);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Idle"));
}

#[tokio::test(start_paused = true)]
async fn unknown_audio_duration_holds_first_keyframe() {
    let engine = test_engine();
    engine
        .handle_transport_message(&chat_with_sequence(json!([
            { "name": "Wave", "proportion": 0.0 },
            { "name": "Nod", "proportion": 0.3 }
        ])))
        .unwrap();
    engine.speech_started(SpeechCue::default());

    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
    assert_eq!(engine.pending_triggers(), 0);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
}

#[tokio::test(start_paused = true)]
async fn suggestion_plays_when_no_sequence() {
    let engine = test_engine();
    engine.set_known_animations(["Idle", "Clap"]);
    engine
        .handle_transport_message(
            &json!({ "type": "chatMessage", "payload": { "bodyAnimationName": "Clap" } })
                .to_string(),
        )
        .unwrap();
    engine.speech_started(SpeechCue::with_duration(2.0));
    assert_eq!(current_name(&engine).as_deref(), Some("Clap"));

    engine
        .handle_transport_message(
            &json!({ "type": "chatMessage", "payload": { "bodyAnimationName": null } })
                .to_string(),
        )
        .unwrap();
    engine.speech_started(SpeechCue::with_duration(2.0));
    assert_eq!(current_name(&engine).as_deref(), Some("Idle"));
}

#[tokio::test(start_paused = true)]
async fn manual_sequence_control() {
    let engine = test_engine();
    engine.play_sequence(
        vec![
            AnimationKeyframe::new("Wave", 0.0),
            AnimationKeyframe::new("Nod", 0.5),
        ],
        Some(2.0),
    );
    assert_eq!(engine.playback_state(), PlaybackState::Playing);

    assert!(engine.pause_sequence());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));

    assert!(engine.resume_sequence());
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Nod"));
    assert_eq!(engine.sequence_cursor(), Some(1));

    engine.stop_sequence();
    assert_eq!(engine.playback_state(), PlaybackState::Stopped);
    assert!(lock(engine.store()).animation.sequence.is_empty());
}

#[test]
fn manual_animation_must_be_known() {
    let engine = test_engine();
    engine.set_known_animations(["Idle", "Wave"]);
    engine.set_current_animation("Wave").unwrap();
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));

    let err = engine.set_current_animation("Backflip").unwrap_err();
    assert_eq!(String::from(err), "unknown animation 'Backflip'");
}

// ── Transport & lifecycle ────────────────────────────────

#[tokio::test(start_paused = true)]
async fn malformed_message_changes_nothing() {
    let engine = test_engine();
    let bad = [
        "not json",
        r#"{"type":"emotionalTrajectory","payload":{"keyframes":[]}}"#,
        r#"{"type":"emotionalTrajectory","payload":{"duration":-1,"keyframes":[{"tag":"happy","proportion":0}]}}"#,
        r#"{"type":"viseme","payload":{"weights":"open"}}"#,
        r#"{"type":"somethingElse","payload":{}}"#,
    ];
    for raw in bad {
        let err = engine.handle_transport_message(raw).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(_)), "{}", raw);
    }

    let store = lock(engine.store());
    assert!(store.trajectory.trajectory().is_none());
    assert!(store.lip_sync.raw().is_empty());
    assert!(store.animation.sequence.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_turns_every_input_into_a_no_op() {
    let engine = test_engine();
    engine.set_shape_dictionary(["a"]);
    engine.set_override("a", 1.0).unwrap();
    engine.tick(Duration::from_secs(1));
    engine
        .handle_transport_message(&chat_with_sequence(json!([
            { "name": "Wave", "proportion": 0.0 },
            { "name": "Nod", "proportion": 0.5 }
        ])))
        .unwrap();
    engine.speech_started(SpeechCue::with_duration(2.0));
    engine.handle_transport_message(&viseme_frame(0.1)).unwrap();
    engine.handle_transport_message(&viseme_frame(0.2)).unwrap();

    engine.shutdown();
    assert!(engine.is_shut_down());
    assert_eq!(engine.pending_triggers(), 0);

    engine
        .handle_transport_message(&trajectory_frame(
            1.0,
            json!([{ "tag": "sad", "proportion": 0.0 }]),
        ))
        .unwrap();
    assert!(!lock(engine.store()).trajectory.is_active());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(lock(engine.store()).lip_sync.raw()["jawOpen"], 0.1);
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
    assert!(matches!(
        engine.set_override("a", 0.2),
        Err(EngineError::ShutDown)
    ));
    assert_eq!(engine.tick(FRAME), weights(&[("a", 1.0)]));

    // Idempotent.
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn late_flush_after_shutdown_is_dropped() {
    let engine = test_engine();
    engine.speech_started(SpeechCue::default());
    engine.set_lip_sync(weights(&[("jawOpen", 0.1)]));
    engine.shutdown();

    // What a trailing timer that already woke would deliver.
    engine
        .router
        .apply(InboundMessage::Viseme(weights(&[("jawOpen", 0.9)])));
    engine.router.apply(InboundMessage::AudioLevel(0.8));
    assert_eq!(lock(engine.store()).lip_sync.raw()["jawOpen"], 0.1);
}

#[tokio::test(start_paused = true)]
async fn absurd_audio_duration_does_not_fault() {
    let engine = test_engine();
    engine.play_sequence(
        vec![
            AnimationKeyframe::new("Wave", 0.0),
            AnimationKeyframe::new("Nod", 0.5),
        ],
        None,
    );
    engine.speech_started(SpeechCue::with_duration(1.0e20));

    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
    assert_eq!(engine.pending_triggers(), 0);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
}

#[tokio::test(start_paused = true)]
async fn model_without_idle_clip_keeps_its_pose() {
    let engine = test_engine();
    engine.set_known_animations(["Wave", "Nod"]);
    engine.speech_started(SpeechCue::with_duration(2.0));
    assert_eq!(engine.current_animation(), None);

    engine.set_current_animation("Wave").unwrap();
    engine.speech_stopped();
    engine.speech_started(SpeechCue::with_duration(2.0));
    assert_eq!(current_name(&engine).as_deref(), Some("Wave"));
}

#[test]
fn config_expressions_extend_builtin_table() {
    let mut config = EngineConfig::default();
    config
        .expressions
        .insert("sleepy".to_string(), weights(&[("eyeBlinkLeft", 0.8)]));
    let engine = AvatarEngine::new(config);

    assert!(engine.table().contains("sleepy"));
    assert!(engine.table().contains("happy"));
}

#[test]
fn frames_without_runtime_are_applied_directly() {
    let engine = test_engine();
    engine.handle_transport_message(&viseme_frame(0.3)).unwrap();
    engine.handle_transport_message(&viseme_frame(0.4)).unwrap();
    assert_eq!(lock(engine.store()).lip_sync.raw()["jawOpen"], 0.4);
}
