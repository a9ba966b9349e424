use super::*;

const RATE: u32 = 24_000;
const CHUNK: usize = 1024;

fn params() -> VadParams {
    VadParams {
        sample_rate: RATE,
        chunk_size: CHUNK,
        ..VadParams::default()
    }
}

fn silence() -> Vec<i16> {
    vec![0; CHUNK]
}

fn quiet_noise(seed: usize) -> Vec<i16> {
    (0..CHUNK)
        .map(|i| (((i + seed) * 37) % 41) as i16 - 20)
        .collect()
}

/// Detector whose noise floor has been calibrated on silence.
fn primed() -> EnergyRatioVad {
    let mut vad = EnergyRatioVad::new(&params());
    for _ in 0..5 {
        vad.process_audio_chunk(&silence()).unwrap();
    }
    vad
}

fn loud() -> Vec<i16> {
    (0..CHUNK)
        .map(|i| ((i as f32 * 0.15).sin() * 10_000.0) as i16)
        .collect()
}

#[test]
fn gate_ignores_alternating_single_chunks() {
    let mut vad = EnergyRatioVad::new(&params());
    for i in 0..60 {
        let chunk = if i % 2 == 0 { loud() } else { silence() };
        let verdict = vad.process_audio_chunk(&chunk).unwrap();
        assert!(!verdict.boundary, "unexpected boundary at chunk {i}");
    }
}

#[test]
fn sustained_speech_fires_one_boundary_at_threshold() {
    let mut vad = EnergyRatioVad::new(&params());
    for _ in 0..20 {
        assert!(!vad.process_audio_chunk(&silence()).unwrap().boundary);
    }
    // 0.3 s at 24 kHz = 7200 samples, reached on the 8th 1024-sample chunk.
    let mut boundaries = Vec::new();
    for i in 0..30 {
        let verdict = vad.process_audio_chunk(&loud()).unwrap();
        assert!(verdict.is_speech);
        if verdict.boundary {
            boundaries.push(i);
            assert!(verdict.speech_started());
        }
    }
    assert_eq!(boundaries, vec![7]);
}

#[test]
fn speech_end_waits_for_min_silence() {
    let mut vad = primed();
    for _ in 0..10 {
        vad.process_audio_chunk(&loud()).unwrap();
    }
    assert!(vad.gate.is_active());
    // 1.0 s of silence = 24000 samples, reached on the 24th chunk.
    let mut ends = Vec::new();
    for i in 0..40 {
        let verdict = vad.process_audio_chunk(&silence()).unwrap();
        if verdict.speech_ended() {
            ends.push(i);
        }
    }
    assert_eq!(ends, vec![23]);
}

#[test]
fn short_pause_does_not_end_speech() {
    let mut vad = primed();
    for _ in 0..10 {
        vad.process_audio_chunk(&loud()).unwrap();
    }
    for _ in 0..5 {
        let verdict = vad.process_audio_chunk(&silence()).unwrap();
        assert!(!verdict.boundary);
        assert!(verdict.active);
        assert!(!verdict.is_speech);
    }
    let verdict = vad.process_audio_chunk(&loud()).unwrap();
    assert!(!verdict.boundary);
    assert!(verdict.active);
}

#[test]
fn noise_floor_adapts_to_background() {
    let mut p = params();
    p.min_energy = 1.0;
    let mut vad = EnergyRatioVad::new(&p);
    for i in 0..40 {
        let verdict = vad.process_audio_chunk(&quiet_noise(i)).unwrap();
        assert!(!verdict.is_speech, "noise chunk {i} classified as speech");
    }
    assert!(vad.noise_floor() > 1.0);
    assert!(vad.process_audio_chunk(&loud()).unwrap().is_speech);
}

#[test]
fn first_chunk_only_calibrates() {
    let mut vad = EnergyRatioVad::new(&params());
    assert!(!vad.process_audio_chunk(&loud()).unwrap().is_speech);
    // A quieter chunk pulls the floor straight back down.
    vad.process_audio_chunk(&silence()).unwrap();
    assert_eq!(vad.noise_floor(), 150.0);
    assert!(vad.process_audio_chunk(&loud()).unwrap().is_speech);
}

#[test]
fn empty_chunk_keeps_state() {
    let mut vad = EnergyRatioVad::new(&params());
    let verdict = vad.process_audio_chunk(&[]).unwrap();
    assert_eq!(verdict, VadVerdict::default());
}

#[test]
fn reset_clears_gate() {
    let mut vad = primed();
    for _ in 0..10 {
        vad.process_audio_chunk(&loud()).unwrap();
    }
    vad.reset();
    assert!(!vad.gate.is_active());
    assert_eq!(vad.noise_floor(), 150.0);
}

#[test]
fn zero_min_speech_starts_on_first_chunk() {
    let mut gate = SpeechGate::new(0, 100);
    assert!(gate.update(true, 10).speech_started());
}

#[test]
fn gate_counts_samples_not_chunks() {
    let mut gate = SpeechGate::new(100, 100);
    assert!(!gate.update(true, 60).boundary);
    assert!(gate.update(true, 60).speech_started());
    assert!(!gate.update(false, 99).boundary);
    assert!(gate.update(false, 1).speech_ended());
}

#[test]
fn builder_selects_energy_without_model() {
    let vad = build_detector(&params()).unwrap();
    assert_eq!(vad.name(), "energy_ratio_vad");

    let mut blank = params();
    blank.model_path = Some(PathBuf::from("   "));
    assert_eq!(build_detector(&blank).unwrap().name(), "energy_ratio_vad");
}

#[test]
fn builder_rejects_invalid_parameters() {
    let mut p = params();
    p.silence_ratio = 0.0;
    assert!(matches!(
        build_detector(&p),
        Err(VadError::InvalidParameters(_))
    ));

    let mut p = params();
    p.threshold = 1.5;
    assert!(build_detector(&p).is_err());
}

#[test]
fn builder_fails_loudly_on_missing_model() {
    let mut p = params();
    p.model_path = Some(PathBuf::from("/nonexistent/rtvoice/vad.onnx"));
    let err = build_detector(&p).err().expect("missing model must fail");
    #[cfg(feature = "neural-vad")]
    assert!(matches!(err, VadError::ModelLoad { .. }));
    #[cfg(not(feature = "neural-vad"))]
    assert!(matches!(err, VadError::NeuralUnavailable(_)));
}
